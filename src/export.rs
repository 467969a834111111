// CSV sink: writes aggregated tables and chart payloads as flat tables

use crate::ir::{AggregatedTable, ChartData, Field, GroupDimension};
use crate::store::Table;
use anyhow::{Context, Result};
use std::io::Write;

pub const TREEMAP_PATH_SEPARATOR: &str = "/";

fn number(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else {
        value.to_string()
    }
}

/// One column per grouping dimension, then the measure
pub fn write_table<W: Write>(table: &AggregatedTable, writer: W) -> Result<()> {
    let mut out = csv::Writer::from_writer(writer);
    let mut header = table.dimensions.clone();
    header.push(table.measure.clone());
    out.write_record(&header).context("Failed to write CSV header")?;
    for row in &table.rows {
        let mut record: Vec<String> = row.key.iter().map(ToString::to_string).collect();
        record.push(row.value.to_string());
        out.write_record(&record).context("Failed to write CSV row")?;
    }
    out.flush().context("Failed to flush CSV output")?;
    Ok(())
}

/// Stored and derived columns after the date, in output order
const RECORD_FIELDS: [Field; 10] = [
    Field::TimeOfDay,
    Field::Country,
    Field::UsState,
    Field::Continent,
    Field::FlightType,
    Field::Year,
    Field::Month,
    Field::DayOfMonth,
    Field::DayOfWeek,
    Field::Decade,
];

/// The processed dataset: one row per record with its derived calendar fields
pub fn write_records<W: Write>(table: &Table, writer: W) -> Result<()> {
    let mut out = csv::Writer::from_writer(writer);
    let mut header = vec!["Date"];
    header.extend(RECORD_FIELDS.iter().map(Field::column_name));
    header.extend(["Aboard", "Fatalities"]);
    out.write_record(&header).context("Failed to write CSV header")?;

    let optional = |v: Option<u32>| v.map(|n| n.to_string()).unwrap_or_default();
    for record in table.iter() {
        let mut row = vec![record.date().format("%Y-%m-%d").to_string()];
        row.extend(
            RECORD_FIELDS
                .iter()
                .map(|field| GroupDimension::Named(*field).value_of(record).to_string()),
        );
        row.push(optional(record.aboard()));
        row.push(optional(record.fatalities()));
        out.write_record(&row).context("Failed to write CSV row")?;
    }
    out.flush().context("Failed to flush CSV output")?;
    Ok(())
}

/// Write a shaped payload. Heatmaps come out wide (one column per matrix
/// column, empty cells for gaps); everything else is long-form.
pub fn write_chart<W: Write>(data: &ChartData, writer: W) -> Result<()> {
    let mut out = csv::Writer::from_writer(writer);
    match data {
        ChartData::Series(series) => {
            out.write_record([&series.x_label, &series.y_label])
                .context("Failed to write CSV header")?;
            for (key, value) in &series.points {
                out.write_record([key.to_string(), number(*value)])
                    .context("Failed to write CSV row")?;
            }
        }
        ChartData::Choropleth(map) => {
            out.write_record(["Location", map.value_label.as_str()])
                .context("Failed to write CSV header")?;
            for (location, value) in &map.locations {
                out.write_record([location.clone(), number(*value)])
                    .context("Failed to write CSV row")?;
            }
        }
        ChartData::Treemap(tree) => {
            out.write_record(["Path", tree.value_label.as_str()])
                .context("Failed to write CSV header")?;
            for node in &tree.nodes {
                out.write_record([node.path.join(TREEMAP_PATH_SEPARATOR), number(node.value)])
                    .context("Failed to write CSV row")?;
            }
        }
        ChartData::Heatmap(matrix) => {
            let mut header = vec![matrix.row_label.clone()];
            header.extend(matrix.cols.iter().map(ToString::to_string));
            out.write_record(&header).context("Failed to write CSV header")?;
            for (row, cells) in matrix.rows.iter().zip(&matrix.cells) {
                let mut record = vec![row.to_string()];
                record.extend(cells.iter().map(|c| c.map(number).unwrap_or_default()));
                out.write_record(&record).context("Failed to write CSV row")?;
            }
        }
        ChartData::TimeHistogram(hist) => {
            out.write_record(["Time", hist.value_label.as_str()])
                .context("Failed to write CSV header")?;
            for bin in &hist.bins {
                out.write_record([bin.label(), number(bin.count)])
                    .context("Failed to write CSV row")?;
            }
        }
    }
    out.flush().context("Failed to flush CSV output")?;
    Ok(())
}

pub fn chart_to_csv_string(data: &ChartData) -> Result<String> {
    let mut bytes = Vec::new();
    write_chart(data, &mut bytes)?;
    String::from_utf8(bytes).context("CSV output is not valid UTF-8")
}
