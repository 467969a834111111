// Filter engine: narrows a table by the user's selections before aggregation

use crate::error::Result;
use crate::ir::{Field, FilterState, GroupDimension, Selection, Value, PASSENGER_FLIGHT};
use crate::store::Table;
use tracing::debug;

impl FilterState {
    pub fn new() -> Self {
        FilterState::default()
    }

    /// Select a single value for the dimension called `name`.
    /// Unknown names fail with `InvalidDimension`.
    pub fn select(mut self, name: &str, raw_value: &str) -> Result<Self> {
        let dimension: GroupDimension = name.parse()?;
        let value = dimension.parse_value(raw_value);
        self.selections.insert(dimension, Selection::Equals(value));
        Ok(self)
    }

    pub fn select_any(mut self, name: &str, raw_values: &[&str]) -> Result<Self> {
        let dimension: GroupDimension = name.parse()?;
        let values = raw_values.iter().map(|raw| dimension.parse_value(raw)).collect();
        self.selections.insert(dimension, Selection::OneOf(values));
        Ok(self)
    }

    pub fn with(mut self, dimension: GroupDimension, selection: Selection) -> Self {
        self.selections.insert(dimension, selection);
        self
    }

    /// Keep commercial passenger flights only
    pub fn passenger_only(self) -> Self {
        self.with(
            GroupDimension::Named(Field::FlightType),
            Selection::Equals(Value::Text(PASSENGER_FLIGHT.to_string())),
        )
    }

    pub fn deactivate(mut self, dimension: GroupDimension) -> Self {
        self.selections.insert(dimension, Selection::Inactive);
        self
    }

    /// True if the dimension carries an active selection
    pub fn is_active(&self, dimension: GroupDimension) -> bool {
        !matches!(self.selections.get(&dimension), None | Some(Selection::Inactive))
    }

    /// The single selected value, if exactly one is selected
    pub fn selected(&self, dimension: GroupDimension) -> Option<&Value> {
        match self.selections.get(&dimension) {
            Some(Selection::Equals(v)) => Some(v),
            Some(Selection::OneOf(vs)) if vs.len() == 1 => vs.first(),
            _ => None,
        }
    }

    pub fn active(&self) -> impl Iterator<Item = (&GroupDimension, &Selection)> {
        self.selections
            .iter()
            .filter(|(_, s)| !matches!(s, Selection::Inactive))
    }
}

impl Selection {
    fn matches(&self, value: &Value) -> bool {
        match self {
            Selection::Inactive => true,
            Selection::Equals(v) => v == value,
            Selection::OneOf(vs) => vs.contains(value),
        }
    }
}

/// Restrict `table` to rows matching every active selection.
/// An empty state returns an equal view.
pub fn apply(table: &Table, state: &FilterState) -> Table {
    let active: Vec<(&GroupDimension, &Selection)> = state.active().collect();
    if active.is_empty() {
        return table.clone();
    }
    let filtered = table.retain(|record| {
        active
            .iter()
            .all(|(dimension, selection)| selection.matches(&dimension.value_of(record)))
    });
    debug!(before = table.len(), after = filtered.len(), filters = active.len(), "applied filters");
    filtered
}
