//! CSV artifact sinks.
//!
//! Three artifacts per run, fixed names, written into the configured output
//! directory. These are the contract with downstream consumers; a failed
//! write here aborts the run.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use polars::prelude::*;
use tracing::info;

use crate::error::Result;

/// Every customer with their feature row, enriched with master attributes.
pub const AGGREGATES_FILE: &str = "customer_aggregates.csv";
/// Retained customers with their cluster label.
pub const SEGMENTS_FILE: &str = "customer_segments.csv";
/// One row per cluster with counts and feature means.
pub const SUMMARY_FILE: &str = "cluster_summary.csv";

pub fn ensure_output_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)?;
    Ok(())
}

/// Write one artifact with a header row; returns the path written.
pub fn write_artifact(dir: &Path, file_name: &str, frame: &mut DataFrame) -> Result<PathBuf> {
    let path = dir.join(file_name);
    let file = File::create(&path)?;
    CsvWriter::new(file).finish(frame)?;
    info!(path = %path.display(), rows = frame.height(), "wrote artifact");
    Ok(path)
}
