// Chart data shaper: turns aggregated tables into the payload each chart kind draws

use crate::aggregate::aggregate;
use crate::error::{DashboardError, Result};
use crate::ir::{
    is_united_states, AggregatedTable, Aggregation, AggregationSpec, ChartData, ChartKind, Choropleth, Field,
    GroupDimension, HeatmapMatrix, MapScope, Series, TimeBin, TimeHistogram, Treemap, TreemapNode, Value,
};
use crate::regions::StateCodes;
use crate::store::Table;
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use std::collections::BTreeSet;
use tracing::{debug, warn};

pub const TREEMAP_ROOT: &str = "World";
const SECONDS_PER_DAY: i64 = 86_400;

/// One bin per minute of the day
pub const MAX_TIME_BINS: usize = 1440;

pub struct ChartShaper {
    state_codes: StateCodes,
}

impl ChartShaper {
    pub fn new(state_codes: StateCodes) -> Self {
        ChartShaper { state_codes }
    }

    pub fn shape(&self, table: &AggregatedTable, kind: &ChartKind) -> Result<ChartData> {
        let data = match kind {
            ChartKind::Line | ChartKind::Histogram => ChartData::Series(series(table)?),
            ChartKind::Choropleth(MapScope::World { exclude_us }) => {
                ChartData::Choropleth(world_map(table, *exclude_us)?)
            }
            ChartKind::Choropleth(MapScope::UsState) => ChartData::Choropleth(self.us_map(table)?),
            ChartKind::Treemap { min_count, with_continent, exclude_us } => {
                ChartData::Treemap(treemap(table, *min_count, *with_continent, *exclude_us)?)
            }
            ChartKind::HeatmapMatrix => ChartData::Heatmap(pivot(table)?),
            ChartKind::TimeHistogram { nbins } => ChartData::TimeHistogram(time_histogram(table, *nbins)?),
        };
        debug!(kind = kind.tag(), rows = table.len(), "shaped chart data");
        Ok(data)
    }

    /// States without a code are dropped and listed in `omitted`
    fn us_map(&self, table: &AggregatedTable) -> Result<Choropleth> {
        let state_idx = single_dimension(table, Field::UsState.column_name())?;
        let mut locations = Vec::new();
        let mut omitted = Vec::new();
        for row in &table.rows {
            let Some(state) = row.key[state_idx].as_text() else {
                continue;
            };
            match self.state_codes.code_for(state) {
                Ok(code) => locations.push((code.to_string(), row.value.as_f64())),
                Err(err) => {
                    warn!(error = %err, "dropping region from US map");
                    omitted.push(state.to_string());
                }
            }
        }
        Ok(Choropleth {
            scope: MapScope::UsState,
            value_label: table.measure.clone(),
            locations,
            omitted,
        })
    }
}

fn expect_dimensions(table: &AggregatedTable, n: usize, chart: &str) -> Result<()> {
    if table.dimensions.len() != n {
        return Err(DashboardError::InvalidDimension(format!(
            "{} needs {} grouping dimension(s), got [{}]",
            chart,
            n,
            table.dimensions.join(", ")
        )));
    }
    Ok(())
}

fn single_dimension(table: &AggregatedTable, name: &str) -> Result<usize> {
    expect_dimensions(table, 1, name)?;
    table
        .dimension_index(name)
        .ok_or_else(|| DashboardError::InvalidDimension(name.to_string()))
}

fn series(table: &AggregatedTable) -> Result<Series> {
    expect_dimensions(table, 1, "line/histogram")?;
    Ok(Series {
        x_label: table.dimensions[0].clone(),
        y_label: table.measure.clone(),
        points: table
            .rows
            .iter()
            .map(|r| (r.key[0].clone(), r.value.as_f64()))
            .collect(),
    })
}

fn world_map(table: &AggregatedTable, exclude_us: bool) -> Result<Choropleth> {
    let country_idx = single_dimension(table, Field::Country.column_name())?;
    let locations = table
        .rows
        .iter()
        .filter_map(|r| r.key[country_idx].as_text().map(|c| (c, r.value.as_f64())))
        .filter(|(country, _)| !(exclude_us && is_united_states(country)))
        .map(|(country, value)| (country.to_string(), value))
        .collect();
    Ok(Choropleth {
        scope: MapScope::World { exclude_us },
        value_label: table.measure.clone(),
        locations,
        omitted: Vec::new(),
    })
}

/// Leaves below `min_count` are left out entirely, never merged into an
/// "other" bucket
fn treemap(table: &AggregatedTable, min_count: f64, with_continent: bool, exclude_us: bool) -> Result<Treemap> {
    let country_idx = table
        .dimension_index(Field::Country.column_name())
        .ok_or_else(|| DashboardError::InvalidDimension(Field::Country.column_name().to_string()))?;
    let continent_idx = if with_continent {
        Some(
            table
                .dimension_index(Field::Continent.column_name())
                .ok_or_else(|| DashboardError::InvalidDimension(Field::Continent.column_name().to_string()))?,
        )
    } else {
        None
    };

    let mut nodes = Vec::new();
    for row in &table.rows {
        let value = row.value.as_f64();
        if value.is_nan() || value < min_count {
            continue;
        }
        let country = row.key[country_idx].to_string();
        if exclude_us && is_united_states(&country) {
            continue;
        }
        let mut path = vec![TREEMAP_ROOT.to_string()];
        if let Some(idx) = continent_idx {
            path.push(row.key[idx].to_string());
        }
        path.push(country);
        nodes.push(TreemapNode { path, value });
    }
    Ok(Treemap {
        value_label: table.measure.clone(),
        nodes,
    })
}

/// Pivot a two-dimension table: distinct values of the first dimension
/// become rows, of the second become columns, both sorted. Absent
/// combinations stay `None`.
pub fn pivot(table: &AggregatedTable) -> Result<HeatmapMatrix> {
    expect_dimensions(table, 2, "heatmap")?;
    let rows: Vec<Value> = table.rows.iter().map(|r| r.key[0].clone()).collect::<BTreeSet<_>>().into_iter().collect();
    let cols: Vec<Value> = table.rows.iter().map(|r| r.key[1].clone()).collect::<BTreeSet<_>>().into_iter().collect();

    let mut cells = vec![vec![None; cols.len()]; rows.len()];
    for row in &table.rows {
        // Both keys come from the sets above
        let (Ok(r), Ok(c)) = (rows.binary_search(&row.key[0]), cols.binary_search(&row.key[1])) else {
            continue;
        };
        cells[r][c] = Some(row.value.as_f64());
    }

    Ok(HeatmapMatrix {
        row_label: table.dimensions[0].clone(),
        col_label: table.dimensions[1].clone(),
        value_label: table.measure.clone(),
        rows,
        cols,
        cells,
    })
}

/// Placeholder calendar day that lets time-only values share a temporal
/// axis. It carries no meaning and never leaves `TimeBin`.
fn sentinel_midnight() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1900, 1, 1)
        .unwrap_or_default()
        .and_time(NaiveTime::default())
}

fn time_histogram(table: &AggregatedTable, nbins: usize) -> Result<TimeHistogram> {
    expect_dimensions(table, 1, "time histogram")?;
    let nbins = nbins.clamp(1, MAX_TIME_BINS) as i64;
    let origin = sentinel_midnight();

    let mut bins: Vec<TimeBin> = (0..nbins)
        .map(|i| TimeBin {
            start: origin + Duration::seconds(i * SECONDS_PER_DAY / nbins),
            end: origin + Duration::seconds((i + 1) * SECONDS_PER_DAY / nbins),
            count: 0.0,
        })
        .collect();
    let mut has_value = vec![false; bins.len()];
    let mut touched_by_nan = vec![false; bins.len()];

    for row in &table.rows {
        let time = match &row.key[0] {
            Value::Time(t) => *t,
            Value::Missing => continue,
            other => {
                return Err(DashboardError::InvalidDimension(format!(
                    "time histogram needs a time-of-day dimension, found '{}'",
                    other
                )))
            }
        };
        let seconds = time.num_seconds_from_midnight() as i64;
        let idx = (seconds * nbins / SECONDS_PER_DAY).clamp(0, nbins - 1) as usize;
        let value = row.value.as_f64();
        if value.is_nan() {
            touched_by_nan[idx] = true;
        } else {
            bins[idx].count += value;
            has_value[idx] = true;
        }
    }

    // A bin stays NaN only when every time that landed in it was NaN
    for (idx, bin) in bins.iter_mut().enumerate() {
        if touched_by_nan[idx] && !has_value[idx] {
            bin.count = f64::NAN;
        }
    }

    Ok(TimeHistogram {
        value_label: table.measure.clone(),
        bins,
    })
}

/// One year x month heatmap for a span of consecutive decades
#[derive(Debug, Clone, PartialEq)]
pub struct DecadeWindow {
    pub decades: Vec<i32>,
    pub matrix: HeatmapMatrix,
}

/// Split consecutive decades into windows of `width`, most recent first.
/// The oldest window takes the remainder.
pub fn partition_decades(decades: &[i32], width: usize) -> Vec<Vec<i32>> {
    decades.rchunks(width.max(1)).map(<[i32]>::to_vec).collect()
}

/// Lazy sequence of per-window heatmaps, recomputed on every pass
pub struct DecadeWindows<'a> {
    table: &'a Table,
    aggregation: Aggregation,
    windows: std::vec::IntoIter<Vec<i32>>,
}

/// Year x month heatmaps over `table`, one per window of `width` decades
/// spanning the table's earliest to latest decade
pub fn decade_windows(table: &Table, aggregation: Aggregation, width: usize) -> DecadeWindows<'_> {
    let span = match (table.iter().map(|r| r.decade()).min(), table.iter().map(|r| r.decade()).max()) {
        (Some(first), Some(last)) => (first..=last).step_by(10).collect(),
        _ => Vec::new(),
    };
    DecadeWindows {
        table,
        aggregation,
        windows: partition_decades(&span, width).into_iter(),
    }
}

impl Iterator for DecadeWindows<'_> {
    type Item = Result<DecadeWindow>;

    fn next(&mut self) -> Option<Self::Item> {
        let decades = self.windows.next()?;
        let view = self.table.retain(|r| decades.contains(&r.decade()));
        let spec = AggregationSpec::count(vec![
            GroupDimension::Named(Field::Year),
            GroupDimension::Named(Field::Month),
        ])
        .with_aggregation(self.aggregation);
        let result = aggregate(&view, &spec)
            .and_then(|agg| pivot(&agg))
            .map(|matrix| DecadeWindow { decades, matrix });
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.windows.size_hint()
    }
}

impl ExactSizeIterator for DecadeWindows<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{AggFunc, AggValue, AggregatedRow, Measure, Record};

    fn shaper() -> ChartShaper {
        ChartShaper::new(StateCodes::embedded().unwrap())
    }

    fn table(dims: &[&str], rows: Vec<(Vec<Value>, f64)>) -> AggregatedTable {
        AggregatedTable {
            dimensions: dims.iter().map(|s| s.to_string()).collect(),
            measure: "Crashes".to_string(),
            rows: rows
                .into_iter()
                .map(|(key, v)| AggregatedRow { key, value: AggValue::Count(v as u64) })
                .collect(),
        }
    }

    fn text(s: &str) -> Value {
        Value::Text(s.to_string())
    }

    #[test]
    fn test_series_pass_through() {
        let agg = table(&["Year"], vec![(vec![Value::Int(2001)], 2.0), (vec![Value::Int(2002)], 1.0)]);
        let ChartData::Series(s) = shaper().shape(&agg, &ChartKind::Line).unwrap() else {
            panic!("Expected Series");
        };
        assert_eq!(s.x_label, "Year");
        assert_eq!(s.y_label, "Crashes");
        assert_eq!(s.points, vec![(Value::Int(2001), 2.0), (Value::Int(2002), 1.0)]);
    }

    #[test]
    fn test_series_rejects_two_dimensions() {
        let agg = table(&["Year", "Month"], vec![]);
        assert!(matches!(
            shaper().shape(&agg, &ChartKind::Histogram),
            Err(DashboardError::InvalidDimension(_))
        ));
    }

    #[test]
    fn test_world_map_excludes_us_on_request() {
        let agg = table(
            &["Country"],
            vec![(vec![text("United States of America")], 50.0), (vec![text("Peru")], 3.0)],
        );
        let kind = ChartKind::Choropleth(MapScope::World { exclude_us: false });
        let ChartData::Choropleth(map) = shaper().shape(&agg, &kind).unwrap() else { panic!() };
        assert_eq!(map.locations.len(), 2);

        let kind = ChartKind::Choropleth(MapScope::World { exclude_us: true });
        let ChartData::Choropleth(map) = shaper().shape(&agg, &kind).unwrap() else { panic!() };
        assert_eq!(map.locations, vec![("Peru".to_string(), 3.0)]);
    }

    #[test]
    fn test_world_map_requires_country() {
        let agg = table(&["Continent"], vec![]);
        let kind = ChartKind::Choropleth(MapScope::World { exclude_us: false });
        assert!(shaper().shape(&agg, &kind).is_err());
    }

    #[test]
    fn test_us_map_drops_unknown_states() {
        let agg = table(
            &["State"],
            vec![
                (vec![text("Texas")], 10.0),
                (vec![text("Atlantis")], 2.0),
                (vec![Value::Missing], 4.0),
                (vec![text("Ohio")], 1.0),
            ],
        );
        let kind = ChartKind::Choropleth(MapScope::UsState);
        let ChartData::Choropleth(map) = shaper().shape(&agg, &kind).unwrap() else { panic!() };
        assert_eq!(map.locations, vec![("TX".to_string(), 10.0), ("OH".to_string(), 1.0)]);
        assert_eq!(map.omitted, vec!["Atlantis".to_string()]);
    }

    #[test]
    fn test_treemap_threshold_and_paths() {
        let agg = table(
            &["Continent", "Country"],
            vec![
                (vec![text("Europe"), text("Spain")], 7.0),
                (vec![text("Europe"), text("Malta")], 4.0),
                (vec![text("North America"), text("United States of America")], 90.0),
            ],
        );
        let kind = ChartKind::Treemap { min_count: 5.0, with_continent: true, exclude_us: false };
        let ChartData::Treemap(tree) = shaper().shape(&agg, &kind).unwrap() else { panic!() };
        assert_eq!(tree.nodes.len(), 2);
        assert_eq!(tree.nodes[0].path, vec!["World", "Europe", "Spain"]);
        assert!(tree.nodes.iter().all(|n| n.value >= 5.0));

        let kind = ChartKind::Treemap { min_count: 5.0, with_continent: false, exclude_us: true };
        let ChartData::Treemap(tree) = shaper().shape(&agg, &kind).unwrap() else { panic!() };
        assert_eq!(tree.nodes.len(), 1);
        assert_eq!(tree.nodes[0].path, vec!["World", "Spain"]);
    }

    #[test]
    fn test_pivot_round_trip_and_gaps() {
        let agg = table(
            &["Month", "Day_of_week"],
            vec![
                (vec![Value::Month(3), Value::Weekday(0)], 4.0),
                (vec![Value::Month(1), Value::Weekday(2)], 1.0),
                (vec![Value::Month(3), Value::Weekday(2)], 2.0),
            ],
        );
        let m = pivot(&agg).unwrap();
        assert_eq!(m.rows, vec![Value::Month(1), Value::Month(3)]);
        assert_eq!(m.cols, vec![Value::Weekday(0), Value::Weekday(2)]);
        for row in &agg.rows {
            assert_eq!(m.get(&row.key[0], &row.key[1]), Some(row.value.as_f64()));
        }
        // January has no Monday entry: a gap, not zero
        assert_eq!(m.cells[0][0], None);
        assert_eq!(m.get(&Value::Month(1), &Value::Weekday(0)), None);
    }

    #[test]
    fn test_time_histogram_bins_with_sentinel() {
        let rows = (0..24)
            .map(|h| (vec![Value::Time(NaiveTime::from_hms_opt(h, 0, 0).unwrap())], 1.0))
            .collect();
        let agg = table(&["Time"], rows);
        let ChartData::TimeHistogram(hist) = shaper().shape(&agg, &ChartKind::TimeHistogram { nbins: 48 }).unwrap()
        else {
            panic!()
        };
        assert_eq!(hist.bins.len(), 48);
        let non_empty = hist.bins.iter().filter(|b| b.count > 0.0).count();
        assert!(non_empty <= 24);
        assert_eq!(non_empty, 24);
        let sentinel = NaiveDate::from_ymd_opt(1900, 1, 1).unwrap();
        assert!(hist.bins.iter().all(|b| b.start.date() == sentinel));
        assert_eq!(hist.bins[2].label(), "01:00-01:30");
        assert_eq!(hist.bins[47].label(), "23:30-24:00");
        assert!(!hist.bins[0].label().contains("1900"));
    }

    #[test]
    fn test_time_histogram_skips_missing_measures_within_a_bin() {
        let day = NaiveDate::from_ymd_opt(1990, 5, 1).unwrap();
        let at = |h, m| Some(NaiveTime::from_hms_opt(h, m, 0).unwrap());
        let records = Table::from_records(vec![
            Record::new(day, "Peru").with_time(at(10, 0)).with_fatalities(Some(5)),
            Record::new(day, "Peru").with_time(at(10, 10)),
            Record::new(day, "Peru").with_time(at(14, 0)),
        ]);
        let spec = AggregationSpec::apply(
            vec![GroupDimension::Named(Field::TimeOfDay)],
            AggFunc::Sum,
            Measure::Fatalities,
        );
        let agg = aggregate(&records, &spec).unwrap();
        let ChartData::TimeHistogram(hist) = shaper().shape(&agg, &ChartKind::TimeHistogram { nbins: 48 }).unwrap()
        else {
            panic!()
        };
        assert_eq!(hist.bins[20].label(), "10:00-10:30");
        assert_eq!(hist.bins[20].count, 5.0);
        // Only missing values landed here
        assert!(hist.bins[28].count.is_nan());
        assert_eq!(hist.bins[0].count, 0.0);
    }

    #[test]
    fn test_time_histogram_bin_count_is_bounded() {
        let agg = table(&["Time"], vec![(vec![Value::Time(NaiveTime::from_hms_opt(23, 59, 0).unwrap())], 1.0)]);
        for nbins in [0, usize::MAX] {
            let ChartData::TimeHistogram(hist) = shaper().shape(&agg, &ChartKind::TimeHistogram { nbins }).unwrap()
            else {
                panic!()
            };
            assert!(!hist.bins.is_empty() && hist.bins.len() <= MAX_TIME_BINS);
            assert_eq!(hist.bins.iter().map(|b| b.count).sum::<f64>(), 1.0);
        }
    }

    #[test]
    fn test_time_histogram_rejects_non_time() {
        let agg = table(&["Year"], vec![(vec![Value::Int(2001)], 1.0)]);
        assert!(shaper().shape(&agg, &ChartKind::TimeHistogram { nbins: 24 }).is_err());
    }

    #[test]
    fn test_partition_decades_most_recent_first() {
        let decades: Vec<i32> = (1900..=2010).step_by(10).collect(); // 12 decades
        let windows = partition_decades(&decades, 5);
        assert_eq!(windows.len(), 3);
        assert_eq!(windows[0], vec![1970, 1980, 1990, 2000, 2010]);
        assert_eq!(windows[2], vec![1900, 1910]);
        let flattened: BTreeSet<i32> = windows.iter().flatten().copied().collect();
        assert_eq!(flattened.len(), decades.len());
    }

    #[test]
    fn test_decade_windows_cover_span() {
        let d = |y| NaiveDate::from_ymd_opt(y, 6, 1).unwrap();
        // 1908 .. 2023 spans 1900..=2020, 13 decades
        let records = vec![Record::new(d(1908), "A"), Record::new(d(1955), "A"), Record::new(d(2023), "A")];
        let table = Table::from_records(records);
        for width in 1..=6 {
            let windows: Vec<DecadeWindow> = decade_windows(&table, Aggregation::Count, width)
                .collect::<Result<_>>()
                .unwrap();
            assert_eq!(windows.len(), (13 + width - 1) / width);
            assert_eq!(*windows[0].decades.last().unwrap(), 2020);
            let all: Vec<i32> = windows.iter().flat_map(|w| w.decades.clone()).collect();
            let unique: BTreeSet<i32> = all.iter().copied().collect();
            assert_eq!(all.len(), 13);
            assert_eq!(unique.len(), 13);
        }
    }

    #[test]
    fn test_decade_window_matrix_contents() {
        let d = |y, m| NaiveDate::from_ymd_opt(y, m, 1).unwrap();
        let table = Table::from_records(vec![
            Record::new(d(2001, 1), "A"),
            Record::new(d(2001, 1), "A"),
            Record::new(d(1999, 5), "A"),
        ]);
        let mut windows = decade_windows(&table, Aggregation::Count, 1);
        assert_eq!(windows.len(), 2);
        let latest = windows.next().unwrap().unwrap();
        assert_eq!(latest.decades, vec![2000]);
        assert_eq!(latest.matrix.get(&Value::Int(2001), &Value::Month(1)), Some(2.0));
        assert_eq!(latest.matrix.get(&Value::Int(1999), &Value::Month(5)), None);
        let older = windows.next().unwrap().unwrap();
        assert_eq!(older.decades, vec![1990]);
        assert!(windows.next().is_none());
    }

    #[test]
    fn test_decade_windows_empty_table() {
        let table = Table::from_records(vec![]);
        assert_eq!(decade_windows(&table, Aggregation::Count, 4).count(), 0);
    }
}
