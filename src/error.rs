// Error taxonomy for the aggregation-and-plotting pipeline

/// Errors raised by the pipeline stages.
///
/// `DataUnavailable` is fatal for the whole dashboard. The dimension and
/// aggregation errors indicate wiring bugs and fail a single chart.
/// `UnknownRegionCode` is recovered by the shaper, and `InvalidColourName`
/// is recovered by the theme resolver.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DashboardError {
    /// The backing dataset is missing, unreadable or lacks a required column.
    #[error("dataset unavailable: {0}")]
    DataUnavailable(String),

    /// A grouping, filter or measure referenced a field that does not exist.
    #[error("the column name is incorrect: '{0}'")]
    InvalidDimension(String),

    /// The requested aggregation function is not supported.
    #[error("the aggregation function is not correct: '{0}'")]
    InvalidAggregationFunction(String),

    /// A geographic label has no code mapping.
    #[error("no region code for '{0}'")]
    UnknownRegionCode(String),

    /// A colour selection is outside the allowed set.
    #[error("invalid colour name: '{0}'")]
    InvalidColourName(String),
}

pub type Result<T> = std::result::Result<T, DashboardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_offender() {
        let err = DashboardError::InvalidDimension("colour".to_string());
        assert!(err.to_string().contains("column name is incorrect"));
        assert!(err.to_string().contains("colour"));

        let err = DashboardError::InvalidAggregationFunction("avg".to_string());
        assert!(err.to_string().contains("aggregation function is not correct"));
    }
}
