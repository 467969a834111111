use crate::error::{DashboardError, Result};
use crate::ir::{AggFunc, Aggregation, AggregationSpec, DateComponent, Field, GroupDimension, Measure, SortOrder, Value};
use chrono::{NaiveTime, Weekday};
use std::str::FromStr;

impl FromStr for GroupDimension {
    type Err = DashboardError;

    /// Plain names refer to stored columns; `date.<component>` asks for a
    /// component computed from the date at grouping time.
    fn from_str(name: &str) -> Result<Self> {
        let lowered = name.trim().to_ascii_lowercase();
        if let Some(component) = lowered.strip_prefix("date.") {
            let component = match component {
                "year" => DateComponent::Year,
                "month" => DateComponent::Month,
                "day" | "day_of_month" => DateComponent::DayOfMonth,
                "weekday" | "day_of_week" => DateComponent::DayOfWeek,
                "decade" => DateComponent::Decade,
                _ => return Err(DashboardError::InvalidDimension(name.to_string())),
            };
            return Ok(GroupDimension::Derived(component));
        }

        let field = match lowered.as_str() {
            "country" | "country/region" => Field::Country,
            "state" | "us_state" => Field::UsState,
            "continent" => Field::Continent,
            "type" | "flight_type" => Field::FlightType,
            "year" => Field::Year,
            "month" => Field::Month,
            "day" | "day_of_month" => Field::DayOfMonth,
            "day_of_week" | "weekday" => Field::DayOfWeek,
            "decade" => Field::Decade,
            "time" | "time_of_day" => Field::TimeOfDay,
            _ => return Err(DashboardError::InvalidDimension(name.to_string())),
        };
        Ok(GroupDimension::Named(field))
    }
}

impl FromStr for Measure {
    type Err = DashboardError;

    fn from_str(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "fatalities" => Ok(Measure::Fatalities),
            "aboard" => Ok(Measure::Aboard),
            "survivors" => Ok(Measure::Survivors),
            _ => Err(DashboardError::InvalidDimension(name.to_string())),
        }
    }
}

impl FromStr for AggFunc {
    type Err = DashboardError;

    fn from_str(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "sum" => Ok(AggFunc::Sum),
            "mean" | "avg" | "average" => Ok(AggFunc::Mean),
            "median" => Ok(AggFunc::Median),
            "min" => Ok(AggFunc::Min),
            "max" => Ok(AggFunc::Max),
            "count" => Ok(AggFunc::Count),
            _ => Err(DashboardError::InvalidAggregationFunction(name.to_string())),
        }
    }
}

impl FromStr for SortOrder {
    type Err = DashboardError;

    fn from_str(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Ok(SortOrder::Ascending),
            "desc" | "descending" => Ok(SortOrder::Descending),
            other => Err(DashboardError::InvalidDimension(format!("sort order '{}'", other))),
        }
    }
}

/// Resolve a comma-separated list of dimension names
pub fn resolve_dimensions(names: &str) -> Result<Vec<GroupDimension>> {
    let dims = names
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .map(GroupDimension::from_str)
        .collect::<Result<Vec<_>>>()?;
    if dims.is_empty() {
        return Err(DashboardError::InvalidDimension(names.to_string()));
    }
    Ok(dims)
}

/// Count mode when no function is given. A function without a measure
/// defaults to fatalities, the only measure the dashboard pages use.
pub fn resolve_aggregation(func: Option<&str>, measure: Option<&str>) -> Result<Aggregation> {
    match func {
        None => Ok(Aggregation::Count),
        Some(func) => {
            let func = AggFunc::from_str(func)?;
            let measure = measure.map(Measure::from_str).transpose()?.unwrap_or(Measure::Fatalities);
            Ok(Aggregation::Apply { func, measure })
        }
    }
}

/// Resolve every name of an aggregation request up front, so a bad name
/// fails before any data is touched
pub fn resolve_spec(
    group_by: &str,
    func: Option<&str>,
    measure: Option<&str>,
    date_name: Option<&str>,
    sort: Option<&str>,
) -> Result<AggregationSpec> {
    let dimensions = resolve_dimensions(group_by)?;
    let aggregation = resolve_aggregation(func, measure)?;
    let mut spec = AggregationSpec::count(dimensions).with_aggregation(aggregation);
    if let Some(name) = date_name {
        spec = spec.with_date_name(name);
    }
    if let Some(order) = sort {
        spec = spec.sorted(SortOrder::from_str(order)?);
    }
    Ok(spec)
}

impl GroupDimension {
    /// Parse a raw filter value into this dimension's key type. Text that
    /// does not parse is kept as text, which simply matches nothing.
    pub fn parse_value(&self, raw: &str) -> Value {
        let raw = raw.trim();
        let as_int = || raw.parse::<i64>().map(Value::Int).unwrap_or_else(|_| Value::Text(raw.to_string()));
        match self {
            GroupDimension::Named(Field::Month) | GroupDimension::Derived(DateComponent::Month) => {
                parse_month(raw).map(Value::Month).unwrap_or_else(|| Value::Text(raw.to_string()))
            }
            GroupDimension::Named(Field::DayOfWeek) | GroupDimension::Derived(DateComponent::DayOfWeek) => {
                raw.parse::<Weekday>()
                    .map(|d| Value::Weekday(d.num_days_from_monday()))
                    .unwrap_or_else(|_| Value::Text(raw.to_string()))
            }
            GroupDimension::Named(Field::TimeOfDay) => NaiveTime::parse_from_str(raw, "%H:%M")
                .map(Value::Time)
                .unwrap_or_else(|_| Value::Text(raw.to_string())),
            GroupDimension::Named(Field::Year | Field::DayOfMonth | Field::Decade)
            | GroupDimension::Derived(_) => as_int(),
            GroupDimension::Named(_) => Value::Text(raw.to_string()),
        }
    }
}

fn parse_month(raw: &str) -> Option<u32> {
    if let Ok(n) = raw.parse::<u32>() {
        return (1..=12).contains(&n).then_some(n);
    }
    raw.parse::<chrono::Month>().ok().map(|m| m.number_from_month())
}
