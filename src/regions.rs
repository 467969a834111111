// US state name -> two-letter code lookup

use crate::error::{DashboardError, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

const EMBEDDED_STATE_CODES: &str = include_str!("../data/us_state_codes.json");

/// On-disk shape: a flat object of `"State name": "XX"` pairs
#[derive(Debug, Deserialize)]
#[serde(transparent)]
struct StateCodeDocument {
    codes: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct StateCodes {
    /// Keyed by lower-cased state name
    codes: HashMap<String, String>,
}

impl StateCodes {
    /// Parse a JSON object of `"State name": "XX"` pairs
    pub fn from_json(text: &str) -> Result<Self> {
        let document: StateCodeDocument = serde_json::from_str(text)
            .map_err(|e| DashboardError::DataUnavailable(format!("state code document: {}", e)))?;
        let codes = document
            .codes
            .into_iter()
            .map(|(name, code)| (name.trim().to_lowercase(), code.trim().to_uppercase()))
            .collect();
        Ok(StateCodes { codes })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            DashboardError::DataUnavailable(format!("{}: {}", path.display(), e))
        })?;
        Self::from_json(&text)
    }

    /// The lookup shipped with the crate
    pub fn embedded() -> Result<Self> {
        Self::from_json(EMBEDDED_STATE_CODES)
    }

    pub fn code_for(&self, state: &str) -> Result<&str> {
        self.codes
            .get(&state.trim().to_lowercase())
            .map(String::as_str)
            .ok_or_else(|| DashboardError::UnknownRegionCode(state.to_string()))
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_covers_states_and_dc() {
        let codes = StateCodes::embedded().unwrap();
        assert_eq!(codes.len(), 51);
        assert_eq!(codes.code_for("New York").unwrap(), "NY");
        assert_eq!(codes.code_for("district of columbia").unwrap(), "DC");
    }

    #[test]
    fn test_unknown_state() {
        let codes = StateCodes::from_json(r#"{"Ohio": "oh"}"#).unwrap();
        assert_eq!(codes.code_for(" ohio ").unwrap(), "OH");
        assert_eq!(
            codes.code_for("Puerto Rico").unwrap_err(),
            DashboardError::UnknownRegionCode("Puerto Rico".to_string())
        );
    }

    #[test]
    fn test_malformed_document() {
        assert!(matches!(
            StateCodes::from_json("[1, 2]"),
            Err(DashboardError::DataUnavailable(_))
        ));
        assert!(matches!(
            StateCodes::from_json(r#"{"Ohio": 39}"#),
            Err(DashboardError::DataUnavailable(_))
        ));
    }
}
