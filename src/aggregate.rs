use crate::error::{DashboardError, Result};
use crate::ir::{
    AggFunc, AggValue, Aggregation, AggregatedRow, AggregatedTable, AggregationSpec, GroupDimension, SortOrder, Value,
};
use crate::store::Table;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Group `table` by `spec.group` and summarize each group.
///
/// Groups appear in order of first appearance unless `spec.sort` is set.
/// Missing measure values are skipped; a group with no present values
/// yields NaN (or 0 for `AggFunc::Count`).
pub fn aggregate(table: &Table, spec: &AggregationSpec) -> Result<AggregatedTable> {
    let dims = &spec.group.dimensions;
    if dims.is_empty() {
        return Err(DashboardError::InvalidDimension(
            "at least one grouping dimension is required".to_string(),
        ));
    }

    // Key -> position in `keys`, preserving first appearance
    let mut index: HashMap<Vec<Value>, usize> = HashMap::new();
    let mut keys: Vec<Vec<Value>> = Vec::new();
    let mut counts: Vec<u64> = Vec::new();
    let mut samples: Vec<Vec<f64>> = Vec::new();

    for record in table.iter() {
        let key: Vec<Value> = dims.iter().map(|d| d.value_of(record)).collect();
        let slot = match index.get(&key) {
            Some(&slot) => slot,
            None => {
                index.insert(key.clone(), keys.len());
                keys.push(key);
                counts.push(0);
                samples.push(Vec::new());
                keys.len() - 1
            }
        };
        counts[slot] += 1;
        if let Aggregation::Apply { measure, .. } = spec.aggregation {
            if let Some(v) = measure.value_of(record) {
                samples[slot].push(v);
            }
        }
    }

    let mut rows: Vec<AggregatedRow> = keys
        .into_iter()
        .zip(counts)
        .zip(samples)
        .map(|((key, count), values)| {
            let value = match spec.aggregation {
                Aggregation::Count => AggValue::Count(count),
                Aggregation::Apply { func, .. } => func.apply(&values),
            };
            AggregatedRow { key, value }
        })
        .collect();

    if let Some(order) = spec.sort {
        rows.sort_by(|a, b| compare_values(a.value.as_f64(), b.value.as_f64(), order));
    }

    Ok(AggregatedTable {
        dimensions: column_names(dims, spec.group.date_name.as_deref()),
        measure: spec.aggregation.column_name().to_string(),
        rows,
    })
}

/// Output column per dimension. Only the first derived dimension takes the
/// `date_name` alias (or "Date"); later ones are named by component.
fn column_names(dims: &[GroupDimension], date_name: Option<&str>) -> Vec<String> {
    let mut seen_derived = false;
    dims.iter()
        .map(|d| match d {
            GroupDimension::Derived(component) if seen_derived => component.column_name().to_string(),
            GroupDimension::Derived(_) => {
                seen_derived = true;
                date_name.unwrap_or(d.column_name()).to_string()
            }
            GroupDimension::Named(_) => d.column_name().to_string(),
        })
        .collect()
}

/// NaN sorts last in either direction
fn compare_values(a: f64, b: f64, order: SortOrder) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => match order {
            SortOrder::Ascending => a.total_cmp(&b),
            SortOrder::Descending => b.total_cmp(&a),
        },
    }
}

impl AggFunc {
    /// Apply to the present values of one group
    pub fn apply(&self, values: &[f64]) -> AggValue {
        let n = values.len() as f64;
        let result = match self {
            AggFunc::Count => return AggValue::Count(values.len() as u64),
            _ if values.is_empty() => f64::NAN,
            AggFunc::Sum => values.iter().sum(),
            AggFunc::Mean => values.iter().sum::<f64>() / n,
            AggFunc::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            AggFunc::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            AggFunc::Median => {
                let mut sorted = values.to_vec();
                sorted.sort_by(f64::total_cmp);
                let mid = sorted.len() / 2;
                if sorted.len() % 2 == 0 {
                    (sorted[mid - 1] + sorted[mid]) / 2.0
                } else {
                    sorted[mid]
                }
            }
        };
        AggValue::Number(result)
    }
}
