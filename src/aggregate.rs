//! Order-level totals from raw line items.
//!
//! Line items arrive in one of two shapes: either each line carries a
//! precomputed `total_price`, or it carries `list_price` and the total must
//! be derived as `list_price * quantity * (1 - discount)`. Exactly one
//! strategy is chosen per run; when neither applies the run stops before
//! touching any downstream stage.

use polars::prelude::*;

use crate::error::{PipelineError, Result};
use crate::schema;

const TOTAL_PRICE: &str = "total_price";
const LIST_PRICE: &str = "list_price";
const QUANTITY: &str = "quantity";
const DISCOUNT: &str = "discount";

/// Canonical column names of the aggregated frame.
pub const ORDER_ID: &str = "order_id";
pub const ORDER_TOTAL: &str = "order_total";
pub const ORDER_QUANTITY: &str = "order_quantity";

/// How order totals were derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TotalsStrategy {
    /// Line items carried a precomputed `total_price`.
    PrecomputedTotal,
    /// Totals derived from `list_price * quantity * (1 - discount)`.
    PriceTimesQuantity,
}

/// Aggregation result: one row per distinct order id, first-appearance
/// order, plus telemetry for the run report.
#[derive(Debug)]
pub struct OrderTotals {
    /// `[order_id, order_total, order_quantity]`
    pub frame: DataFrame,
    pub strategy: TotalsStrategy,
    /// Line rows dropped by the hygiene filter before grouping.
    pub dropped_lines: usize,
}

/// Group line items into one monetary total and one quantity per order.
pub fn order_totals(line_items: &DataFrame) -> Result<OrderTotals> {
    let columns = schema::column_names(line_items);
    let order_id = schema::resolve_order_id_column("order_items", &columns)?;

    let has = |name: &str| columns.iter().any(|c| c == name);
    let strategy = if has(TOTAL_PRICE) && has(QUANTITY) {
        TotalsStrategy::PrecomputedTotal
    } else if has(LIST_PRICE) && has(QUANTITY) {
        TotalsStrategy::PriceTimesQuantity
    } else {
        return Err(PipelineError::schema_with_columns(
            "cannot compute order totals: need either 'total_price' with 'quantity' \
             or 'list_price' with 'quantity'",
            &columns,
        ));
    };

    let monetary = match strategy {
        TotalsStrategy::PrecomputedTotal => TOTAL_PRICE,
        TotalsStrategy::PriceTimesQuantity => LIST_PRICE,
    };

    // Hygiene filter. Lines that cannot be attributed to an order, have a
    // non-positive quantity, or a negative monetary value would push a
    // customer's totals below zero, which the feature stage assumes cannot
    // happen. Non-numeric text in a numeric role casts to null and is
    // dropped by the same predicates.
    let filtered = line_items
        .clone()
        .lazy()
        .filter(
            col(&order_id)
                .is_not_null()
                .and(col(QUANTITY).cast(DataType::Float64).gt(lit(0.0)))
                .and(col(monetary).cast(DataType::Float64).gt_eq(lit(0.0))),
        )
        .collect()?;
    let dropped_lines = line_items.height() - filtered.height();

    let mut totals = match strategy {
        TotalsStrategy::PrecomputedTotal => filtered
            .lazy()
            .group_by_stable([col(&order_id)])
            .agg([
                col(TOTAL_PRICE)
                    .cast(DataType::Float64)
                    .sum()
                    .alias(ORDER_TOTAL),
                col(QUANTITY)
                    .cast(DataType::Float64)
                    .sum()
                    .alias(ORDER_QUANTITY),
            ])
            .collect()?,
        TotalsStrategy::PriceTimesQuantity => filtered
            .lazy()
            .with_column(
                (col(LIST_PRICE).cast(DataType::Float64)
                    * col(QUANTITY).cast(DataType::Float64)
                    * discount_factor(&columns))
                .alias("line_total"),
            )
            .group_by_stable([col(&order_id)])
            .agg([
                col("line_total").sum().alias(ORDER_TOTAL),
                col(QUANTITY)
                    .cast(DataType::Float64)
                    .sum()
                    .alias(ORDER_QUANTITY),
            ])
            .collect()?,
    };

    if order_id != ORDER_ID {
        totals.rename(&order_id, ORDER_ID)?;
    }
    let normalized = schema::normalize_id_series(totals.column(ORDER_ID)?)?;
    totals.with_column(normalized)?;

    Ok(OrderTotals {
        frame: totals,
        strategy,
        dropped_lines,
    })
}

/// `1 - discount`, with the discount read as a fraction, nulls as zero and
/// values clamped into `[0, 1]` so a bad fraction cannot flip the sign of a
/// line total. A missing discount column means full price.
fn discount_factor(columns: &[String]) -> Expr {
    if columns.iter().any(|c| c == DISCOUNT) {
        let discount = col(DISCOUNT).cast(DataType::Float64).fill_null(lit(0.0));
        let clamped = when(discount.clone().lt(lit(0.0)))
            .then(lit(0.0))
            .when(discount.clone().gt(lit(1.0)))
            .then(lit(1.0))
            .otherwise(discount);
        lit(1.0) - clamped
    } else {
        lit(1.0)
    }
}
