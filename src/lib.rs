// Library exports for crashviz

pub mod error;
pub mod ir;

// Data loading
pub mod csv_reader;
pub mod store;

// Pipeline
pub mod resolve;
pub mod filter;
pub mod aggregate;
pub mod regions;
pub mod shaper;

// Theme
pub mod colours;
pub mod scale;
pub mod palette;

// Output and pages
pub mod graph;
pub mod export;
pub mod runtime;
pub mod config;
