use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Weekday};
use std::collections::BTreeMap;
use std::fmt;

pub const UNKNOWN_CONTINENT: &str = "Unknown";
pub const PASSENGER_FLIGHT: &str = "Passenger";
pub const UNITED_STATES: &str = "United States of America";

pub const MONTH_NAMES: [&str; 12] = [
    "January", "February", "March", "April", "May", "June",
    "July", "August", "September", "October", "November", "December",
];

pub const WEEKDAY_NAMES: [&str; 7] = [
    "Monday", "Tuesday", "Wednesday", "Thursday", "Friday", "Saturday", "Sunday",
];

/// True for the spellings of the United States found in the dataset
pub fn is_united_states(country: &str) -> bool {
    matches!(
        country.trim().to_ascii_lowercase().as_str(),
        "united states of america" | "united states" | "usa" | "us"
    )
}

// =============================================================================
// Phase 1: Records
// =============================================================================

/// One accident entry. Calendar fields are derived once in `Record::new`
/// and cannot drift from `date` afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    date: NaiveDate,
    time_of_day: Option<NaiveTime>,
    country: String,
    us_state: Option<String>,
    continent: String,
    flight_type: String,
    fatalities: Option<u32>,
    aboard: Option<u32>,
    year: i32,
    month: u32,
    day_of_month: u32,
    day_of_week: Weekday,
    decade: i32,
}

impl Record {
    pub fn new(date: NaiveDate, country: impl Into<String>) -> Self {
        let year = date.year();
        Record {
            date,
            time_of_day: None,
            country: country.into(),
            us_state: None,
            continent: UNKNOWN_CONTINENT.to_string(),
            flight_type: String::new(),
            fatalities: None,
            aboard: None,
            year,
            month: date.month(),
            day_of_month: date.day(),
            day_of_week: date.weekday(),
            decade: decade_of(year),
        }
    }

    pub fn with_time(mut self, time: Option<NaiveTime>) -> Self {
        self.time_of_day = time;
        self
    }

    pub fn with_us_state(mut self, state: Option<String>) -> Self {
        self.us_state = state.filter(|s| !s.trim().is_empty());
        self
    }

    /// Missing or blank continents become "Unknown"
    pub fn with_continent(mut self, continent: Option<String>) -> Self {
        self.continent = continent
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| UNKNOWN_CONTINENT.to_string());
        self
    }

    pub fn with_flight_type(mut self, flight_type: impl Into<String>) -> Self {
        self.flight_type = flight_type.into();
        self
    }

    pub fn with_fatalities(mut self, fatalities: Option<u32>) -> Self {
        self.fatalities = fatalities;
        self
    }

    pub fn with_aboard(mut self, aboard: Option<u32>) -> Self {
        self.aboard = aboard;
        self
    }

    pub fn date(&self) -> NaiveDate { self.date }
    pub fn time_of_day(&self) -> Option<NaiveTime> { self.time_of_day }
    pub fn country(&self) -> &str { &self.country }
    pub fn us_state(&self) -> Option<&str> { self.us_state.as_deref() }
    pub fn continent(&self) -> &str { &self.continent }
    pub fn flight_type(&self) -> &str { &self.flight_type }
    pub fn fatalities(&self) -> Option<u32> { self.fatalities }
    pub fn aboard(&self) -> Option<u32> { self.aboard }
    pub fn year(&self) -> i32 { self.year }
    pub fn month(&self) -> u32 { self.month }
    pub fn day_of_month(&self) -> u32 { self.day_of_month }
    pub fn day_of_week(&self) -> Weekday { self.day_of_week }
    pub fn decade(&self) -> i32 { self.decade }
}

/// `year - (year mod 10)`, using the euclidean remainder so pre-year-0
/// dates still land on a multiple of 10 that is not above the year.
pub fn decade_of(year: i32) -> i32 {
    year - year.rem_euclid(10)
}

// =============================================================================
// Phase 2: Grouping keys and dimensions
// =============================================================================

/// A single grouping-key cell
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Value {
    Int(i64),
    /// 1-based calendar month
    Month(u32),
    /// Days from Monday (0 = Monday)
    Weekday(u32),
    Time(NaiveTime),
    Text(String),
    Missing,
}

impl Value {
    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Missing)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric position on a continuous axis, where one exists
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Month(m) => Some(*m as f64),
            Value::Weekday(d) => Some(*d as f64),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{}", i),
            Value::Month(m) => {
                let name = MONTH_NAMES.get((*m as usize).wrapping_sub(1)).copied().unwrap_or("?");
                write!(f, "{}", name)
            }
            Value::Weekday(d) => {
                write!(f, "{}", WEEKDAY_NAMES.get(*d as usize).copied().unwrap_or("?"))
            }
            Value::Time(t) => write!(f, "{}", t.format("%H:%M")),
            Value::Text(s) => write!(f, "{}", s),
            Value::Missing => write!(f, ""),
        }
    }
}

/// Columns stored on a `Record`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    Country,
    UsState,
    Continent,
    FlightType,
    Year,
    Month,
    DayOfMonth,
    DayOfWeek,
    Decade,
    TimeOfDay,
}

/// Date components computed from `Record::date` at grouping time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DateComponent {
    Year,
    Month,
    DayOfMonth,
    DayOfWeek,
    Decade,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GroupDimension {
    Named(Field),
    Derived(DateComponent),
}

impl Field {
    pub fn column_name(&self) -> &'static str {
        match self {
            Field::Country => "Country",
            Field::UsState => "State",
            Field::Continent => "Continent",
            Field::FlightType => "Type",
            Field::Year => "Year",
            Field::Month => "Month",
            Field::DayOfMonth => "Day",
            Field::DayOfWeek => "Day_of_week",
            Field::Decade => "Decade",
            Field::TimeOfDay => "Time",
        }
    }
}

impl DateComponent {
    pub fn column_name(&self) -> &'static str {
        match self {
            DateComponent::Year => "Year",
            DateComponent::Month => "Month",
            DateComponent::DayOfMonth => "Day",
            DateComponent::DayOfWeek => "Day_of_week",
            DateComponent::Decade => "Decade",
        }
    }

    pub fn value_of(&self, date: NaiveDate) -> Value {
        match self {
            DateComponent::Year => Value::Int(date.year() as i64),
            DateComponent::Month => Value::Month(date.month()),
            DateComponent::DayOfMonth => Value::Int(date.day() as i64),
            DateComponent::DayOfWeek => Value::Weekday(date.weekday().num_days_from_monday()),
            DateComponent::Decade => Value::Int(decade_of(date.year()) as i64),
        }
    }
}

impl GroupDimension {
    /// Output column name before any `date_name` alias is applied
    pub fn column_name(&self) -> &'static str {
        match self {
            GroupDimension::Named(field) => field.column_name(),
            GroupDimension::Derived(_) => "Date",
        }
    }

    pub fn is_date_derived(&self) -> bool {
        matches!(self, GroupDimension::Derived(_))
    }

    pub fn value_of(&self, record: &Record) -> Value {
        match self {
            GroupDimension::Derived(component) => component.value_of(record.date()),
            GroupDimension::Named(field) => match field {
                Field::Country => Value::Text(record.country().to_string()),
                Field::UsState => record
                    .us_state()
                    .map(|s| Value::Text(s.to_string()))
                    .unwrap_or(Value::Missing),
                Field::Continent => Value::Text(record.continent().to_string()),
                Field::FlightType => Value::Text(record.flight_type().to_string()),
                Field::Year => Value::Int(record.year() as i64),
                Field::Month => Value::Month(record.month()),
                Field::DayOfMonth => Value::Int(record.day_of_month() as i64),
                Field::DayOfWeek => Value::Weekday(record.day_of_week().num_days_from_monday()),
                Field::Decade => Value::Int(record.decade() as i64),
                Field::TimeOfDay => record.time_of_day().map(Value::Time).unwrap_or(Value::Missing),
            },
        }
    }
}

// =============================================================================
// Phase 3: Aggregation
// =============================================================================

/// Numeric columns that can be aggregated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Measure {
    Fatalities,
    Aboard,
    /// `aboard - fatalities`, present only when both are
    Survivors,
}

impl Measure {
    pub fn column_name(&self) -> &'static str {
        match self {
            Measure::Fatalities => "Fatalities",
            Measure::Aboard => "Aboard",
            Measure::Survivors => "Survivors",
        }
    }

    pub fn value_of(&self, record: &Record) -> Option<f64> {
        match self {
            Measure::Fatalities => record.fatalities().map(f64::from),
            Measure::Aboard => record.aboard().map(f64::from),
            Measure::Survivors => match (record.aboard(), record.fatalities()) {
                (Some(a), Some(f)) => Some(a.saturating_sub(f) as f64),
                _ => None,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggFunc {
    Sum,
    Mean,
    Median,
    Min,
    Max,
    /// Number of non-missing measure values
    Count,
}

impl AggFunc {
    pub fn name(&self) -> &'static str {
        match self {
            AggFunc::Sum => "sum",
            AggFunc::Mean => "mean",
            AggFunc::Median => "median",
            AggFunc::Min => "min",
            AggFunc::Max => "max",
            AggFunc::Count => "count",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Aggregation {
    /// Row count per group, reported as "Crashes"
    Count,
    Apply { func: AggFunc, measure: Measure },
}

impl Aggregation {
    pub fn column_name(&self) -> &'static str {
        match self {
            Aggregation::Count => "Crashes",
            Aggregation::Apply { measure, .. } => measure.column_name(),
        }
    }

    /// Heading for a page built on this aggregation
    pub fn title(&self) -> String {
        match self {
            Aggregation::Count => "Number of crashes".to_string(),
            Aggregation::Apply { func, measure } => {
                format!("{} of {}", capitalize(func.name()), measure.column_name().to_lowercase())
            }
        }
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortOrder {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupSpec {
    pub dimensions: Vec<GroupDimension>,
    /// Display name for the date-derived dimension
    pub date_name: Option<String>,
}

impl GroupSpec {
    pub fn new(dimensions: Vec<GroupDimension>) -> Self {
        GroupSpec { dimensions, date_name: None }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AggregationSpec {
    pub group: GroupSpec,
    pub aggregation: Aggregation,
    pub sort: Option<SortOrder>,
}

impl AggregationSpec {
    pub fn count(dimensions: Vec<GroupDimension>) -> Self {
        AggregationSpec {
            group: GroupSpec::new(dimensions),
            aggregation: Aggregation::Count,
            sort: None,
        }
    }

    pub fn apply(dimensions: Vec<GroupDimension>, func: AggFunc, measure: Measure) -> Self {
        AggregationSpec {
            group: GroupSpec::new(dimensions),
            aggregation: Aggregation::Apply { func, measure },
            sort: None,
        }
    }

    pub fn with_aggregation(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = aggregation;
        self
    }

    pub fn with_date_name(mut self, name: impl Into<String>) -> Self {
        self.group.date_name = Some(name.into());
        self
    }

    pub fn sorted(mut self, order: SortOrder) -> Self {
        self.sort = Some(order);
        self
    }
}

/// An aggregated cell. Count mode can only ever produce `Count`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AggValue {
    Count(u64),
    Number(f64),
}

impl AggValue {
    pub fn as_f64(&self) -> f64 {
        match self {
            AggValue::Count(n) => *n as f64,
            AggValue::Number(x) => *x,
        }
    }
}

impl fmt::Display for AggValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggValue::Count(n) => write!(f, "{}", n),
            AggValue::Number(x) if x.is_nan() => write!(f, "NaN"),
            AggValue::Number(x) => write!(f, "{}", x),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedRow {
    pub key: Vec<Value>,
    pub value: AggValue,
}

/// One row per distinct key combination. Built per chart, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedTable {
    pub dimensions: Vec<String>,
    pub measure: String,
    pub rows: Vec<AggregatedRow>,
}

impl AggregatedTable {
    pub fn get(&self, key: &[Value]) -> Option<AggValue> {
        self.rows.iter().find(|r| r.key == key).map(|r| r.value)
    }

    pub fn dimension_index(&self, name: &str) -> Option<usize> {
        self.dimensions.iter().position(|d| d.eq_ignore_ascii_case(name))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

// =============================================================================
// Phase 4: Filtering
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Selection {
    #[default]
    Inactive,
    Equals(Value),
    OneOf(Vec<Value>),
}

/// Per-render filter selections, keyed by dimension
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FilterState {
    pub(crate) selections: BTreeMap<GroupDimension, Selection>,
}

// =============================================================================
// Phase 5: Chart shaping
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapScope {
    World { exclude_us: bool },
    UsState,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChartKind {
    Line,
    Histogram,
    Choropleth(MapScope),
    Treemap {
        min_count: f64,
        with_continent: bool,
        exclude_us: bool,
    },
    HeatmapMatrix,
    TimeHistogram { nbins: usize },
}

impl ChartKind {
    pub fn tag(&self) -> &'static str {
        match self {
            ChartKind::Line => "line",
            ChartKind::Histogram => "histogram",
            ChartKind::Choropleth(MapScope::World { .. }) => "choropleth-world",
            ChartKind::Choropleth(MapScope::UsState) => "choropleth-usa",
            ChartKind::Treemap { .. } => "treemap",
            ChartKind::HeatmapMatrix => "heatmap",
            ChartKind::TimeHistogram { .. } => "time-histogram",
        }
    }
}

/// Long-form x/y payload for line and histogram charts
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub x_label: String,
    pub y_label: String,
    pub points: Vec<(Value, f64)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Choropleth {
    pub scope: MapScope,
    pub value_label: String,
    /// Country names for world maps, two-letter codes for US maps
    pub locations: Vec<(String, f64)>,
    /// Labels dropped for lack of a region code
    pub omitted: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TreemapNode {
    /// Root first, leaf last
    pub path: Vec<String>,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Treemap {
    pub value_label: String,
    pub nodes: Vec<TreemapNode>,
}

/// Dense pivot of a two-dimension aggregation. `None` means no data,
/// which is distinct from a zero count.
#[derive(Debug, Clone, PartialEq)]
pub struct HeatmapMatrix {
    pub row_label: String,
    pub col_label: String,
    pub value_label: String,
    pub rows: Vec<Value>,
    pub cols: Vec<Value>,
    pub cells: Vec<Vec<Option<f64>>>,
}

impl HeatmapMatrix {
    pub fn get(&self, row: &Value, col: &Value) -> Option<f64> {
        let r = self.rows.iter().position(|v| v == row)?;
        let c = self.cols.iter().position(|v| v == col)?;
        self.cells[r][c]
    }
}

/// A bin over the time-of-day axis. The sentinel calendar date that
/// places it on a temporal axis stays private.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeBin {
    pub(crate) start: NaiveDateTime,
    pub(crate) end: NaiveDateTime,
    pub count: f64,
}

impl TimeBin {
    pub fn start_time(&self) -> NaiveTime {
        self.start.time()
    }

    /// `HH:MM-HH:MM`; the last bin ends at 24:00
    pub fn label(&self) -> String {
        let end = if self.end.date() > self.start.date() {
            "24:00".to_string()
        } else {
            self.end.format("%H:%M").to_string()
        };
        format!("{}-{}", self.start.format("%H:%M"), end)
    }

    /// Seconds since midnight at the bin start
    pub fn offset_seconds(&self) -> f64 {
        self.start.time().num_seconds_from_midnight() as f64
    }

    pub fn width_seconds(&self) -> f64 {
        (self.end - self.start).num_seconds() as f64
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimeHistogram {
    pub value_label: String,
    pub bins: Vec<TimeBin>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChartData {
    Series(Series),
    Choropleth(Choropleth),
    Treemap(Treemap),
    Heatmap(HeatmapMatrix),
    TimeHistogram(TimeHistogram),
}

// =============================================================================
// Phase 6: Theme
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    pub fn to_hex(&self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.0, self.1, self.2)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscreteColour {
    /// The name or hex the user picked
    pub label: String,
    pub rgb: Rgb,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThemeConfig {
    pub discrete_colour: DiscreteColour,
    /// Name of a continuous scale known to `scale::ColourScale`
    pub continuous_scale: String,
    pub figure_height: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_derives_calendar_fields() {
        let date = NaiveDate::from_ymd_opt(1977, 3, 27).unwrap();
        let record = Record::new(date, "Spain");
        assert_eq!(record.year(), 1977);
        assert_eq!(record.month(), 3);
        assert_eq!(record.day_of_month(), 27);
        assert_eq!(record.day_of_week(), Weekday::Sun);
        assert_eq!(record.decade(), 1970);
    }

    #[test]
    fn test_decade_is_multiple_of_ten_not_above_year() {
        for year in [-15, -1, 0, 9, 10, 1908, 1999, 2000, 2023] {
            let decade = decade_of(year);
            assert_eq!(decade.rem_euclid(10), 0);
            assert!(decade <= year);
            assert!(year - decade < 10);
        }
    }

    #[test]
    fn test_continent_never_missing() {
        let date = NaiveDate::from_ymd_opt(2001, 1, 1).unwrap();
        let record = Record::new(date, "Peru").with_continent(None);
        assert_eq!(record.continent(), UNKNOWN_CONTINENT);
        let record = Record::new(date, "Peru").with_continent(Some("  ".to_string()));
        assert_eq!(record.continent(), UNKNOWN_CONTINENT);
    }

    #[test]
    fn test_value_display_and_order() {
        assert_eq!(Value::Month(2).to_string(), "February");
        assert_eq!(Value::Weekday(6).to_string(), "Sunday");
        assert!(Value::Month(2) < Value::Month(11));
        assert!(Value::Int(5) < Value::Missing);
    }

    #[test]
    fn test_named_and_derived_dimensions_agree() {
        let date = NaiveDate::from_ymd_opt(1994, 9, 8).unwrap();
        let record = Record::new(date, "USA");
        let pairs = [
            (Field::Year, DateComponent::Year),
            (Field::Month, DateComponent::Month),
            (Field::DayOfMonth, DateComponent::DayOfMonth),
            (Field::DayOfWeek, DateComponent::DayOfWeek),
            (Field::Decade, DateComponent::Decade),
        ];
        for (field, component) in pairs {
            assert_eq!(
                GroupDimension::Named(field).value_of(&record),
                GroupDimension::Derived(component).value_of(&record)
            );
        }
    }

    #[test]
    fn test_survivors_requires_both_counts() {
        let date = NaiveDate::from_ymd_opt(1994, 9, 8).unwrap();
        let record = Record::new(date, "USA").with_aboard(Some(10)).with_fatalities(Some(4));
        assert_eq!(Measure::Survivors.value_of(&record), Some(6.0));
        let record = Record::new(date, "USA").with_fatalities(Some(4));
        assert_eq!(Measure::Survivors.value_of(&record), None);
    }

    #[test]
    fn test_aggregation_titles() {
        assert_eq!(Aggregation::Count.title(), "Number of crashes");
        let sum = Aggregation::Apply { func: AggFunc::Sum, measure: Measure::Fatalities };
        assert_eq!(sum.title(), "Sum of fatalities");
        assert_eq!(sum.column_name(), "Fatalities");
    }
}
