//! Customer segmentation over raw transactional records.
//!
//! Orders, order line items and customer records are pulled from a
//! relational store whose exact column names are not guaranteed. The
//! pipeline resolves the columns it needs heuristically, aggregates line
//! items into per-order totals, derives per-customer RFM-style features
//! (recency, frequency, monetary), z-scores them, and partitions the
//! customers into K behavioral segments with seeded K-Means. Results land
//! as CSV artifacts plus two charts.
//!
//! The stages run strictly in sequence, each consuming the previous one's
//! output: resolve columns, aggregate order totals, build customer
//! features, filter and scale, cluster, persist.

pub mod aggregate;
pub mod cli;
pub mod cluster;
pub mod config;
pub mod error;
pub mod features;
pub mod persist;
pub mod pipeline;
pub mod scale;
pub mod schema;
pub mod source;
pub mod viz;

// Re-export the surface a caller actually needs.
pub use cli::Args;
pub use config::{SegmentationConfig, SourceLocation};
pub use error::{PipelineError, Result};
pub use pipeline::{run, run_with_source, PipelineReport};
