// Run configuration: dataset and lookup locations plus page defaults

use crate::error::Result;
use crate::ir::Aggregation;
use crate::palette::ThemeResolver;
use crate::regions::StateCodes;
use crate::runtime::PageOptions;
use crate::shaper::MAX_TIME_BINS;
use crate::store::RecordStore;
use std::path::PathBuf;

pub const DEFAULT_DATA_PATH: &str = "data/crashes.csv";
pub const DEFAULT_DECADE_WINDOW: usize = 4;
pub const DEFAULT_TREEMAP_MIN: f64 = 5.0;
pub const DEFAULT_TIME_BINS: usize = 48;

#[derive(Debug, Clone, PartialEq)]
pub struct DashboardConfig {
    pub data_path: PathBuf,
    /// Allowed colour names; the embedded list when `None`
    pub colours_path: Option<PathBuf>,
    /// State-name to code document; the embedded one when `None`
    pub state_codes_path: Option<PathBuf>,
    pub decade_window: usize,
    pub treemap_min: f64,
    pub time_bins: usize,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        DashboardConfig {
            data_path: PathBuf::from(DEFAULT_DATA_PATH),
            colours_path: None,
            state_codes_path: None,
            decade_window: DEFAULT_DECADE_WINDOW,
            treemap_min: DEFAULT_TREEMAP_MIN,
            time_bins: DEFAULT_TIME_BINS,
        }
    }
}

impl DashboardConfig {
    pub fn load_store(&self) -> Result<RecordStore> {
        RecordStore::load(&self.data_path)
    }

    pub fn state_codes(&self) -> Result<StateCodes> {
        match &self.state_codes_path {
            Some(path) => StateCodes::load(path),
            None => StateCodes::embedded(),
        }
    }

    pub fn theme_resolver(&self) -> Result<ThemeResolver> {
        match &self.colours_path {
            Some(path) => ThemeResolver::load(path),
            None => Ok(ThemeResolver::embedded()),
        }
    }

    pub fn page_options(&self, aggregation: Aggregation) -> PageOptions {
        PageOptions {
            aggregation,
            decade_window: self.decade_window.max(1),
            treemap_min: self.treemap_min,
            time_bins: self.time_bins.clamp(1, MAX_TIME_BINS),
            ..PageOptions::default()
        }
    }
}
