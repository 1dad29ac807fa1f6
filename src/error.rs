//! Error types for the segmentation pipeline.
//!
//! Every fatal condition is a variant of one enum so each stage returns a
//! typed result and the binary maps any propagated error to a non-zero exit.

use thiserror::Error;

/// Errors that can abort a segmentation run.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The run configuration is unusable before any data is touched.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A required column could not be resolved, or no strategy exists to
    /// derive a required value from the columns that are present.
    #[error("schema error: {0}")]
    Schema(String),

    /// A required row set could not be loaded, or a resolved column turned
    /// out to carry no usable values at all.
    #[error("data unavailable: {0}")]
    DataUnavailable(String),

    /// Fewer usable rows remained after filtering than requested clusters.
    #[error("insufficient data: {rows} usable rows for {clusters} clusters")]
    InsufficientData { rows: usize, clusters: usize },

    /// A non-essential artifact sink (chart rendering) failed. The
    /// orchestrator logs this and keeps going instead of propagating it.
    #[error("sink failure: {0}")]
    Sink(String),

    /// K-Means fitting failed.
    #[error("clustering failed: {0}")]
    Cluster(String),

    /// A DataFrame operation failed.
    #[error("dataframe error: {0}")]
    Frame(#[from] polars::prelude::PolarsError),

    /// Relational store access failed.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// File I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    /// Schema error carrying the columns that were actually available, so a
    /// failed run tells the operator what the store really looked like.
    pub fn schema_with_columns(what: &str, available: &[String]) -> Self {
        PipelineError::Schema(format!(
            "{what}; available columns: [{}]",
            available.join(", ")
        ))
    }
}
