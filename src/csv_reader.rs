use anyhow::{anyhow, Context, Result};
use csv::ReaderBuilder;
use std::fs::File;
use std::io::Read;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct CsvData {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl CsvData {
    /// Index of the first header matching any of `names`, ignoring case
    pub fn find_column(&self, names: &[&str]) -> Option<usize> {
        names.iter().find_map(|name| {
            self.headers
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(name))
        })
    }

    pub fn require_column(&self, names: &[&str]) -> Result<usize> {
        self.find_column(names).ok_or_else(|| {
            anyhow!(
                "Column '{}' not found. Available columns: {}",
                names.join("' or '"),
                self.headers.join(", ")
            )
        })
    }

    /// Cell text, trimmed; short rows read as empty
    pub fn cell(&self, row: usize, column: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .map(|s| s.trim())
            .unwrap_or("")
    }
}

pub fn read_csv_from_path(path: &Path) -> Result<CsvData> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open dataset '{}'", path.display()))?;
    read_csv(file).with_context(|| format!("Failed to read dataset '{}'", path.display()))
}

pub fn read_csv<R: Read>(source: R) -> Result<CsvData> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(source);

    let headers = reader
        .headers()
        .context("Failed to read CSV headers")?
        .iter()
        .map(|s| s.to_string())
        .collect();

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result.context("Failed to read CSV record")?;
        let row: Vec<String> = record.iter().map(|s| s.to_string()).collect();
        rows.push(row);
    }

    if rows.is_empty() {
        return Err(anyhow!("CSV must contain at least one data row"));
    }

    Ok(CsvData { headers, rows })
}
