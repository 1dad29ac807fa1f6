//! Sequential orchestration of the segmentation stages.
//!
//! Each stage consumes the previous stage's output and owns its own
//! result; nothing here is concurrent or incremental. Fatal errors
//! propagate immediately, chart failures are logged and skipped.

use std::path::PathBuf;

use polars::prelude::*;
use tracing::{info, warn};

use crate::aggregate::{self, TotalsStrategy};
use crate::cluster::{self, ClusterModel};
use crate::config::SegmentationConfig;
use crate::error::{PipelineError, Result};
use crate::features;
use crate::persist;
use crate::scale;
use crate::schema::{self, CUSTOMER_ID};
use crate::source::{self, TableSource, CUSTOMERS, ORDERS, ORDER_ITEMS};
use crate::viz;

/// What one run did, for logging and assertions.
#[derive(Debug)]
pub struct PipelineReport {
    pub orders_rows: usize,
    pub order_item_rows: usize,
    pub customer_rows: usize,
    pub totals_strategy: TotalsStrategy,
    pub dropped_line_items: usize,
    pub unparsable_timestamps: usize,
    pub orders_dropped_null_customer: usize,
    pub orderless_master_customers: usize,
    /// Rows in the feature table (every known customer).
    pub customers_total: usize,
    /// Rows that survived the activity filter and were clustered.
    pub customers_retained: usize,
    pub customers_dropped_inactive: usize,
    pub clusters: usize,
    pub inertia: f64,
    pub cluster_sizes: Vec<usize>,
    /// Files written, CSV artifacts first, then any charts.
    pub artifacts: Vec<PathBuf>,
}

/// Run the full segmentation pipeline with the given configuration.
pub fn run(config: &SegmentationConfig) -> Result<PipelineReport> {
    config.validate()?;
    let source = source::open_source(&config.source)?;
    run_with_source(config, source.as_ref())
}

/// Run against an already-opened source.
pub fn run_with_source(
    config: &SegmentationConfig,
    source: &dyn TableSource,
) -> Result<PipelineReport> {
    config.validate()?;
    info!(
        clusters = config.clusters,
        seed = config.seed,
        "starting customer segmentation"
    );

    let orders = source.load_table(ORDERS)?;
    let order_items = source.load_table(ORDER_ITEMS)?;
    let customers = source.load_table(CUSTOMERS)?;

    let order_columns = schema::column_names(&orders);
    let date_col = schema::resolve_date_column(ORDERS, &order_columns)?;
    let order_id_col = schema::resolve_order_id_column(ORDERS, &order_columns)?;
    info!(
        date_column = %date_col,
        order_id_column = %order_id_col,
        "resolved order columns"
    );

    let totals = aggregate::order_totals(&order_items)?;
    info!(
        strategy = ?totals.strategy,
        orders = totals.frame.height(),
        dropped_lines = totals.dropped_lines,
        "aggregated order totals"
    );

    let feats = features::build(&orders, &date_col, &order_id_col, &totals.frame, &customers)?;
    info!(
        customers = feats.frame.height(),
        merged_rows = feats.merged_rows,
        reference_date = feats.max_order_date().as_deref().unwrap_or("none"),
        "built customer features"
    );
    if feats.unparsable_timestamps > 0 {
        warn!(
            count = feats.unparsable_timestamps,
            "order dates failed to parse and were treated as missing"
        );
    }

    persist::ensure_output_dir(&config.output_dir)?;
    let mut aggregates = features::attach_customer_details(&feats.frame, &customers)?;
    let aggregates_path =
        persist::write_artifact(&config.output_dir, persist::AGGREGATES_FILE, &mut aggregates)?;

    let matrix = features::feature_matrix(&feats.frame)?;
    let retained = scale::filter_and_scale(&matrix);
    info!(
        retained = retained.indices.len(),
        dropped_inactive = retained.dropped,
        "filtered customers without activity"
    );

    let model = cluster::fit_kmeans(
        &retained.scaled,
        config.clusters,
        config.seed,
        config.max_iterations,
        config.tolerance,
    )?;
    info!(
        inertia = model.inertia,
        sizes = ?model.cluster_sizes(),
        "fitted k-means"
    );

    let mut segments = build_segments(&aggregates, &feats.frame, &retained.indices, &model)?;
    let segments_path =
        persist::write_artifact(&config.output_dir, persist::SEGMENTS_FILE, &mut segments)?;
    let mut summary = cluster::cluster_summary(&retained.raw, &model)?;
    let summary_path =
        persist::write_artifact(&config.output_dir, persist::SUMMARY_FILE, &mut summary)?;

    let mut artifacts = vec![aggregates_path, segments_path, summary_path];
    match viz::render_report(&retained.scaled, &model, &config.output_dir) {
        Ok((scatter, distribution)) => {
            artifacts.push(scatter);
            artifacts.push(distribution);
        }
        Err(err) => warn!("chart rendering failed, continuing without charts: {err}"),
    }

    let report = PipelineReport {
        orders_rows: orders.height(),
        order_item_rows: order_items.height(),
        customer_rows: customers.height(),
        totals_strategy: totals.strategy,
        dropped_line_items: totals.dropped_lines,
        unparsable_timestamps: feats.unparsable_timestamps,
        orders_dropped_null_customer: feats.orders_dropped_null_customer,
        orderless_master_customers: feats.orderless_master_customers,
        customers_total: feats.frame.height(),
        customers_retained: retained.indices.len(),
        customers_dropped_inactive: retained.dropped,
        clusters: config.clusters,
        inertia: model.inertia,
        cluster_sizes: model.cluster_sizes(),
        artifacts,
    };
    info!(
        customers = report.customers_total,
        retained = report.customers_retained,
        artifacts = report.artifacts.len(),
        "segmentation complete"
    );
    Ok(report)
}

/// Inner-join the enriched aggregates with the cluster labels of the
/// retained rows, keyed by customer identifier.
fn build_segments(
    aggregates: &DataFrame,
    feature_table: &DataFrame,
    retained: &[usize],
    model: &ClusterModel,
) -> Result<DataFrame> {
    let ids = feature_table.column(CUSTOMER_ID)?;
    let labels: Vec<i64> = model.labels.iter().map(|&l| l as i64).collect();

    let label_frame = match ids.dtype() {
        DataType::Int64 => {
            let ca = ids.i64()?;
            let taken: Vec<Option<i64>> = retained.iter().map(|&i| ca.get(i)).collect();
            DataFrame::new(vec![
                Series::new(CUSTOMER_ID, taken),
                Series::new("cluster", labels),
            ])?
        }
        DataType::Utf8 => {
            let ca = ids.utf8()?;
            let taken: Vec<Option<String>> = retained
                .iter()
                .map(|&i| ca.get(i).map(|s| s.to_string()))
                .collect();
            DataFrame::new(vec![
                Series::new(CUSTOMER_ID, taken),
                Series::new("cluster", labels),
            ])?
        }
        other => {
            return Err(PipelineError::Schema(format!(
                "unsupported customer identifier dtype {other:?}"
            )))
        }
    };

    Ok(aggregates.join(
        &label_frame,
        [CUSTOMER_ID],
        [CUSTOMER_ID],
        JoinArgs::new(JoinType::Inner),
    )?)
}
