// Record store: loads the cleaned dataset once and hands out read-only views

use crate::csv_reader::{self, CsvData};
use crate::error::{DashboardError, Result};
use crate::ir::{is_united_states, Record};
use chrono::{NaiveDate, NaiveTime};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

const MISSING_MARKERS: [&str; 6] = ["", "?", "nan", "none", "null", "n/a"];
const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%m/%d/%Y", "%B %d, %Y"];
const TIME_FORMATS: [&str; 3] = ["%H:%M", "%H:%M:%S", "%H%M"];

/// An immutable view over the loaded records.
///
/// Filtering produces a new view sharing the same base records, so the
/// base table is never copied or mutated.
#[derive(Debug, Clone)]
pub struct Table {
    base: Arc<[Record]>,
    rows: Vec<usize>,
}

impl Table {
    pub fn from_records(records: Vec<Record>) -> Self {
        let rows = (0..records.len()).collect();
        Table {
            base: records.into(),
            rows,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record> + '_ {
        self.rows.iter().map(move |&i| &self.base[i])
    }

    /// A narrower view keeping the rows that satisfy `keep`
    pub fn retain<F>(&self, keep: F) -> Table
    where
        F: Fn(&Record) -> bool,
    {
        let rows = self
            .rows
            .iter()
            .copied()
            .filter(|&i| keep(&self.base[i]))
            .collect();
        Table {
            base: Arc::clone(&self.base),
            rows,
        }
    }

    /// True when both views read from the same loaded records
    pub fn shares_base_with(&self, other: &Table) -> bool {
        Arc::ptr_eq(&self.base, &other.base)
    }
}

impl PartialEq for Table {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().zip(other.iter()).all(|(a, b)| a == b)
    }
}

#[derive(Debug, Clone)]
pub struct RecordStore {
    table: Table,
    skipped_rows: usize,
}

impl RecordStore {
    /// Load the dataset at `path`. A missing or malformed file is fatal.
    pub fn load(path: &Path) -> Result<Self> {
        let data = csv_reader::read_csv_from_path(path)
            .map_err(|e| DashboardError::DataUnavailable(format!("{:#}", e)))?;
        let store = Self::from_csv(&data)?;
        info!(
            path = %path.display(),
            records = store.table.len(),
            skipped = store.skipped_rows,
            "loaded dataset"
        );
        Ok(store)
    }

    pub fn from_csv(data: &CsvData) -> Result<Self> {
        let required = |names: &[&str]| {
            data.require_column(names)
                .map_err(|e| DashboardError::DataUnavailable(e.to_string()))
        };
        let date_col = required(&["Date"])?;
        let country_col = required(&["Country", "Country/Region"])?;
        let type_col = required(&["Type", "Flight_type"])?;
        let time_col = data.find_column(&["Time", "Time_of_day"]);
        let state_col = data.find_column(&["State", "US_State"]);
        let continent_col = data.find_column(&["Continent"]);
        let fatalities_col = data.find_column(&["Fatalities"]);
        let aboard_col = data.find_column(&["Aboard"]);

        let optional = |row: usize, col: Option<usize>| -> Option<String> {
            col.map(|c| data.cell(row, c))
                .filter(|s| !is_missing_marker(s))
                .map(str::to_string)
        };

        let mut records = Vec::with_capacity(data.rows.len());
        let mut skipped_rows = 0;

        for row in 0..data.rows.len() {
            let raw_date = data.cell(row, date_col);
            let Some(date) = parse_date(raw_date) else {
                warn!(row = row + 1, value = raw_date, "skipping row with unparseable date");
                skipped_rows += 1;
                continue;
            };

            let country = data.cell(row, country_col).to_string();
            let us_state = if is_united_states(&country) {
                optional(row, state_col)
            } else {
                None
            };

            let record = Record::new(date, country)
                .with_time(optional(row, time_col).and_then(|t| parse_time(&t)))
                .with_us_state(us_state)
                .with_continent(optional(row, continent_col))
                .with_flight_type(data.cell(row, type_col))
                .with_fatalities(optional(row, fatalities_col).and_then(|v| parse_count(&v)))
                .with_aboard(optional(row, aboard_col).and_then(|v| parse_count(&v)));
            records.push(record);
        }

        debug!(records = records.len(), "derived calendar fields");

        Ok(RecordStore {
            table: Table::from_records(records),
            skipped_rows,
        })
    }

    /// A view over every loaded record
    pub fn table(&self) -> Table {
        self.table.clone()
    }

    pub fn skipped_rows(&self) -> usize {
        self.skipped_rows
    }
}

fn is_missing_marker(raw: &str) -> bool {
    let lowered = raw.trim().to_ascii_lowercase();
    MISSING_MARKERS.contains(&lowered.as_str())
}

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    // Timestamps exported as "YYYY-MM-DD HH:MM:SS" keep only the date part
    let raw = raw.split_once(' ').filter(|(d, _)| d.len() == 10).map_or(raw, |(d, _)| d);
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
}

pub fn parse_time(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim();
    TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(raw, fmt).ok())
}

/// Non-negative whole counts; "3.0" is accepted, anything else is missing
pub fn parse_count(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    if let Ok(n) = raw.parse::<u32>() {
        return Some(n);
    }
    match raw.parse::<f64>() {
        Ok(x) if x.is_finite() && x >= 0.0 && x.fract() == 0.0 && x <= u32::MAX as f64 => {
            Some(x as u32)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn store_from(content: &str) -> Result<RecordStore> {
        let data = csv_reader::read_csv(Cursor::new(content.to_string())).unwrap();
        RecordStore::from_csv(&data)
    }

    #[test]
    fn test_load_derives_fields() {
        let store = store_from(
            "Date,Time,Country,State,Continent,Type,Fatalities\n\
             1977-03-27,17:06,Spain,,Europe,Passenger,583\n",
        )
        .unwrap();
        let table = store.table();
        let record = table.iter().next().unwrap();
        assert_eq!(record.year(), 1977);
        assert_eq!(record.decade(), 1970);
        assert_eq!(record.time_of_day(), NaiveTime::from_hms_opt(17, 6, 0));
        assert_eq!(record.fatalities(), Some(583));
        assert_eq!(record.continent(), "Europe");
    }

    #[test]
    fn test_missing_markers_and_unknown_continent() {
        let store = store_from(
            "Date,Time,Country,Continent,Type,Fatalities\n\
             1950-01-01,?,Peru,,Military,?\n",
        )
        .unwrap();
        let table = store.table();
        let record = table.iter().next().unwrap();
        assert_eq!(record.time_of_day(), None);
        assert_eq!(record.fatalities(), None);
        assert_eq!(record.continent(), "Unknown");
    }

    #[test]
    fn test_state_kept_only_for_united_states() {
        let store = store_from(
            "Date,Country,State,Type\n\
             2001-01-01,United States of America,Ohio,Passenger\n\
             2001-01-02,Canada,Ontario,Passenger\n",
        )
        .unwrap();
        let states: Vec<Option<&str>> = store.table.iter().map(|r| r.us_state()).collect();
        assert_eq!(states, vec![Some("Ohio"), None]);
    }

    #[test]
    fn test_unparseable_dates_are_skipped() {
        let store = store_from("Date,Country,Type\nnot a date,Peru,Passenger\n1990-05-01,Peru,Passenger\n").unwrap();
        assert_eq!(store.table().len(), 1);
        assert_eq!(store.skipped_rows(), 1);
    }

    #[test]
    fn test_missing_required_column_is_data_unavailable() {
        let err = store_from("Date,Country\n1990-05-01,Peru\n").unwrap_err();
        assert!(matches!(err, DashboardError::DataUnavailable(_)));
    }

    #[test]
    fn test_load_missing_file_is_data_unavailable() {
        let err = RecordStore::load(Path::new("/nonexistent/crashes.csv")).unwrap_err();
        assert!(matches!(err, DashboardError::DataUnavailable(_)));
    }

    #[test]
    fn test_parse_formats() {
        assert_eq!(parse_date("September 17, 1908"), NaiveDate::from_ymd_opt(1908, 9, 17));
        assert_eq!(parse_date("07/12/1912"), NaiveDate::from_ymd_opt(1912, 7, 12));
        assert_eq!(parse_date("1912-07-12 00:00:00"), NaiveDate::from_ymd_opt(1912, 7, 12));
        assert_eq!(parse_time("1718"), NaiveTime::from_hms_opt(17, 18, 0));
        assert_eq!(parse_count("12.0"), Some(12));
        assert_eq!(parse_count("-1"), None);
        assert_eq!(parse_count("2.5"), None);
    }

    #[test]
    fn test_retain_never_touches_base() {
        let store = store_from("Date,Country,Type\n1990-05-01,Peru,A\n1991-05-01,Chile,B\n").unwrap();
        let all = store.table();
        let peru = all.retain(|r| r.country() == "Peru");
        assert_eq!(peru.len(), 1);
        assert_eq!(all.len(), 2);
        assert!(peru.shares_base_with(&all));
    }
}
