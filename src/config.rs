//! Run configuration.
//!
//! One immutable value built at process start from the parsed CLI arguments
//! and handed to the pipeline entry point. There is no global mutable state;
//! a fixed configuration plus a fixed input store yields identical output.

use std::path::PathBuf;

use crate::error::{PipelineError, Result};

pub const DEFAULT_CLUSTERS: usize = 4;
pub const DEFAULT_SEED: u64 = 42;
pub const DEFAULT_MAX_ITERATIONS: u64 = 300;
pub const DEFAULT_TOLERANCE: f64 = 1e-4;

/// Where the three input row sets come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    /// SQLite database file holding `orders`, `order_items` and `customers`.
    Sqlite(PathBuf),
    /// Directory holding `orders.csv`, `order_items.csv` and `customers.csv`.
    CsvDir(PathBuf),
}

impl SourceLocation {
    /// Classify a path: a directory is a CSV export, anything else is
    /// treated as a SQLite database file.
    pub fn detect(path: PathBuf) -> Self {
        if path.is_dir() {
            SourceLocation::CsvDir(path)
        } else {
            SourceLocation::Sqlite(path)
        }
    }

    pub fn path(&self) -> &PathBuf {
        match self {
            SourceLocation::Sqlite(path) | SourceLocation::CsvDir(path) => path,
        }
    }
}

/// Immutable settings for one segmentation run.
#[derive(Debug, Clone)]
pub struct SegmentationConfig {
    /// Input store with the orders, order line items and customer tables.
    pub source: SourceLocation,
    /// Directory the CSV artifacts and charts are written into.
    pub output_dir: PathBuf,
    /// Number of clusters K.
    pub clusters: usize,
    /// Seed for K-Means initialization; a fixed seed makes runs repeatable.
    pub seed: u64,
    /// Iteration cap for a single K-Means run.
    pub max_iterations: u64,
    /// Convergence tolerance for K-Means.
    pub tolerance: f64,
}

impl SegmentationConfig {
    /// Check the numeric knobs once, before any data is loaded.
    pub fn validate(&self) -> Result<()> {
        if self.clusters == 0 {
            return Err(PipelineError::Config(
                "cluster count must be at least 1".into(),
            ));
        }
        if self.max_iterations == 0 {
            return Err(PipelineError::Config(
                "maximum iterations must be at least 1".into(),
            ));
        }
        if !self.tolerance.is_finite() || self.tolerance <= 0.0 {
            return Err(PipelineError::Config(format!(
                "tolerance must be a positive finite number, got {}",
                self.tolerance
            )));
        }
        Ok(())
    }
}
