//! Command-line interface definitions and argument parsing.

use std::path::PathBuf;

use clap::Parser;

use crate::config::{self, SegmentationConfig, SourceLocation};

/// Segment customers from raw order data using RFM features and K-Means.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Input store: a SQLite database file, or a directory of CSV exports
    /// (orders.csv, order_items.csv, customers.csv)
    #[arg(short, long, default_value = "retail_sales.db")]
    pub source: PathBuf,

    /// Directory the CSV artifacts and charts are written into
    #[arg(short, long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Number of customer segments (K)
    #[arg(short = 'k', long, default_value_t = config::DEFAULT_CLUSTERS)]
    pub clusters: usize,

    /// Random seed for K-Means initialization
    #[arg(long, default_value_t = config::DEFAULT_SEED)]
    pub seed: u64,

    /// Maximum iterations for a single K-Means run
    #[arg(long, default_value_t = config::DEFAULT_MAX_ITERATIONS)]
    pub max_iterations: u64,

    /// Convergence tolerance for K-Means
    #[arg(long, default_value_t = config::DEFAULT_TOLERANCE)]
    pub tolerance: f64,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Build the immutable run configuration.
    pub fn to_config(&self) -> SegmentationConfig {
        SegmentationConfig {
            source: SourceLocation::detect(self.source.clone()),
            output_dir: self.output_dir.clone(),
            clusters: self.clusters,
            seed: self.seed,
            max_iterations: self.max_iterations,
            tolerance: self.tolerance,
        }
    }
}
