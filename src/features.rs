//! Per-customer RFM-style features.
//!
//! Orders (with their resolved date and identifier columns) are merged with
//! the per-order totals, unioned with the customer master so order-less
//! customers still get a row, and rolled up to one feature row per customer:
//! frequency (`total_orders`), monetary (`total_sales`, `avg_order_value`,
//! `total_quantity`) and recency (`recency_days`, measured against the most
//! recent order date in the dataset, not the wall clock).

use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use ndarray::Array2;
use polars::prelude::*;
use tracing::warn;

use crate::aggregate::{ORDER_ID, ORDER_QUANTITY, ORDER_TOTAL};
use crate::error::{PipelineError, Result};
use crate::schema::{self, CUSTOMER_ID};

pub const TOTAL_ORDERS: &str = "total_orders";
pub const TOTAL_SALES: &str = "total_sales";
pub const TOTAL_QUANTITY: &str = "total_quantity";
pub const LAST_ORDER_DATE: &str = "last_order_date";
pub const AVG_ORDER_VALUE: &str = "avg_order_value";
pub const RECENCY_DAYS: &str = "recency_days";

/// Feature columns, in the order they enter the clustering matrix.
pub const FEATURE_COLUMNS: [&str; 5] = [
    TOTAL_ORDERS,
    TOTAL_SALES,
    AVG_ORDER_VALUE,
    TOTAL_QUANTITY,
    RECENCY_DAYS,
];

/// Recency assigned to customers with no dated orders. Far outside any real
/// recency so such customers are recognizable in the artifacts and easy to
/// filter before clustering.
pub const SENTINEL_RECENCY_DAYS: f64 = 9999.0;

const ORDER_TS: &str = "order_ts";
const LAST_ORDER_TS: &str = "last_order_ts";
const MICROS_PER_DAY: i64 = 86_400_000_000;

/// Feature table plus telemetry for the run report.
#[derive(Debug)]
pub struct CustomerFeatures {
    /// One row per customer:
    /// `[customer_id, total_orders, total_sales, total_quantity,
    ///   last_order_date, avg_order_value, recency_days]`
    pub frame: DataFrame,
    /// Non-null date values that failed every parse attempt.
    pub unparsable_timestamps: usize,
    /// Order rows dropped because their customer identifier was null.
    pub orders_dropped_null_customer: usize,
    /// Customers present only in the master, added with zeroed features.
    pub orderless_master_customers: usize,
    /// Rows after merging orders with order totals.
    pub merged_rows: usize,
    /// Most recent order timestamp across the whole dataset, microseconds
    /// since the Unix epoch.
    pub max_order_ts: Option<i64>,
}

impl CustomerFeatures {
    /// Human-readable dataset reference date.
    pub fn max_order_date(&self) -> Option<String> {
        self.max_order_ts.and_then(format_timestamp)
    }
}

/// Build the per-customer feature table.
pub fn build(
    orders: &DataFrame,
    date_col: &str,
    order_id_col: &str,
    totals: &DataFrame,
    customers: &DataFrame,
) -> Result<CustomerFeatures> {
    let order_columns = schema::column_names(orders);
    schema::require_customer_id("orders", &order_columns)?;
    if order_id_col == CUSTOMER_ID {
        return Err(PipelineError::Schema(format!(
            "order id resolution landed on '{CUSTOMER_ID}'; \
             the orders table has no distinct order identifier"
        )));
    }
    if order_id_col == date_col {
        return Err(PipelineError::Schema(format!(
            "column '{order_id_col}' matched both the order id and date roles"
        )));
    }

    let mut narrowed = orders.select([order_id_col, date_col, CUSTOMER_ID])?;
    if order_id_col != ORDER_ID {
        narrowed.rename(order_id_col, ORDER_ID)?;
    }
    let order_ids = schema::normalize_id_series(narrowed.column(ORDER_ID)?)?;
    narrowed.with_column(order_ids)?;
    let customer_ids = schema::normalize_id_series(narrowed.column(CUSTOMER_ID)?)?;
    narrowed.with_column(customer_ids)?;

    let (timestamps, unparsable_timestamps) =
        parse_timestamp_column(narrowed.column(date_col)?)?;
    if narrowed.height() > 0 && timestamps.null_count() == narrowed.height() {
        return Err(PipelineError::DataUnavailable(format!(
            "no values in date column '{date_col}' could be parsed as timestamps"
        )));
    }
    let mut narrowed = narrowed.drop(date_col)?;
    narrowed.with_column(timestamps)?;

    // Dataset-wide reference date, taken before any row filtering so every
    // dated order anchors recency, attributable or not.
    let max_order_ts = narrowed.column(ORDER_TS)?.i64()?.max();

    let total_rows = narrowed.height();
    let usable = total_rows - narrowed.column(CUSTOMER_ID)?.null_count();
    if total_rows > 0 && usable == 0 {
        return Err(PipelineError::Schema(format!(
            "orders table does not have a usable '{CUSTOMER_ID}' column (all values null)"
        )));
    }
    let narrowed = narrowed
        .lazy()
        .filter(col(CUSTOMER_ID).is_not_null())
        .collect()?;
    let orders_dropped_null_customer = total_rows - narrowed.height();

    let mut merged = join_totals(narrowed, totals)?;
    let merged_rows = merged.height();

    let orderless_master_customers = match master_ids(customers, merged.column(CUSTOMER_ID)?) {
        Some(ids) => {
            let fresh = master_only_ids(merged.column(CUSTOMER_ID)?, &ids)?;
            let count = fresh.len();
            if count > 0 {
                let phantom = DataFrame::new(vec![
                    Series::full_null(ORDER_ID, count, merged.column(ORDER_ID)?.dtype()),
                    fresh,
                    Series::full_null(ORDER_TS, count, &DataType::Int64),
                    Series::full_null(ORDER_TOTAL, count, &DataType::Float64),
                    Series::full_null(ORDER_QUANTITY, count, &DataType::Float64),
                ])?;
                merged = merged.vstack(&phantom)?;
            }
            count
        }
        None => 0,
    };

    let grouped = merged
        .lazy()
        .group_by_stable([col(CUSTOMER_ID)])
        .agg([
            col(ORDER_ID)
                .drop_nulls()
                .n_unique()
                .cast(DataType::Int64)
                .alias(TOTAL_ORDERS),
            col(ORDER_TOTAL).sum().alias(TOTAL_SALES),
            col(ORDER_QUANTITY).sum().alias(TOTAL_QUANTITY),
            col(ORDER_TS).max().alias(LAST_ORDER_TS),
        ])
        .collect()?;

    let ids = grouped.column(CUSTOMER_ID)?.clone();
    let orders_count: Vec<i64> = grouped
        .column(TOTAL_ORDERS)?
        .i64()?
        .into_iter()
        .map(|v| v.unwrap_or(0))
        .collect();
    let sales: Vec<f64> = grouped
        .column(TOTAL_SALES)?
        .f64()?
        .into_iter()
        .map(|v| v.unwrap_or(0.0))
        .collect();
    let quantity: Vec<f64> = grouped
        .column(TOTAL_QUANTITY)?
        .f64()?
        .into_iter()
        .map(|v| v.unwrap_or(0.0))
        .collect();
    let last_ts: Vec<Option<i64>> = grouped.column(LAST_ORDER_TS)?.i64()?.into_iter().collect();

    let mut avg_value = Vec::with_capacity(sales.len());
    let mut recency = Vec::with_capacity(sales.len());
    let mut last_date: Vec<Option<String>> = Vec::with_capacity(sales.len());
    for i in 0..sales.len() {
        let avg = if orders_count[i] > 0 {
            let value = sales[i] / orders_count[i] as f64;
            if value.is_finite() {
                value
            } else {
                0.0
            }
        } else {
            0.0
        };
        avg_value.push(avg);

        let days = match (max_order_ts, last_ts[i]) {
            (Some(max), Some(last)) => ((max - last) / MICROS_PER_DAY) as f64,
            _ => SENTINEL_RECENCY_DAYS,
        };
        recency.push(days);
        last_date.push(last_ts[i].and_then(format_timestamp));
    }

    let frame = DataFrame::new(vec![
        ids,
        Series::new(TOTAL_ORDERS, orders_count),
        Series::new(TOTAL_SALES, sales),
        Series::new(TOTAL_QUANTITY, quantity),
        Series::new(LAST_ORDER_DATE, last_date),
        Series::new(AVG_ORDER_VALUE, avg_value),
        Series::new(RECENCY_DAYS, recency),
    ])?;

    Ok(CustomerFeatures {
        frame,
        unparsable_timestamps,
        orders_dropped_null_customer,
        orderless_master_customers,
        merged_rows,
        max_order_ts,
    })
}

/// Left-join per-order totals onto the narrowed orders, aligning identifier
/// dtypes first. When one side resolved to integers and the other to text,
/// both are joined as text.
fn join_totals(mut narrowed: DataFrame, totals: &DataFrame) -> Result<DataFrame> {
    let mut totals = totals.clone();
    let left = narrowed.column(ORDER_ID)?.dtype().clone();
    let right = totals.column(ORDER_ID)?.dtype().clone();
    if left != right {
        let cast = narrowed.column(ORDER_ID)?.cast(&DataType::Utf8)?;
        narrowed.with_column(cast)?;
        let cast = totals.column(ORDER_ID)?.cast(&DataType::Utf8)?;
        totals.with_column(cast)?;
    }
    Ok(narrowed.join(
        &totals,
        [ORDER_ID],
        [ORDER_ID],
        JoinArgs::new(JoinType::Left),
    )?)
}

/// Normalized customer identifiers from the master table, or `None` when
/// the master has no identifier compatible with the orders side.
fn master_ids(customers: &DataFrame, merged_ids: &Series) -> Option<Series> {
    let columns = schema::column_names(customers);
    let id_col = match schema::resolve_master_customer_id(&columns) {
        Some(name) => name,
        None => {
            warn!("customer master has no identifier column; order-less customers are skipped");
            return None;
        }
    };
    let raw = customers.column(&id_col).ok()?;
    let normalized = match schema::normalize_id_series(raw) {
        Ok(series) => series,
        Err(err) => {
            warn!("customer master identifier '{id_col}' unusable: {err}");
            return None;
        }
    };
    if normalized.dtype() != merged_ids.dtype() {
        warn!(
            "customer master identifier '{id_col}' has dtype {:?} but orders carry {:?}; \
             order-less customers are skipped",
            normalized.dtype(),
            merged_ids.dtype()
        );
        return None;
    }
    Some(normalized)
}

/// Master identifiers that never appear in the merged orders, deduplicated,
/// in master order.
fn master_only_ids(merged_ids: &Series, master: &Series) -> Result<Series> {
    match merged_ids.dtype() {
        DataType::Int64 => {
            let seen: HashSet<i64> = merged_ids.i64()?.into_iter().flatten().collect();
            let mut added: HashSet<i64> = HashSet::new();
            let mut fresh: Vec<i64> = Vec::new();
            for id in master.i64()?.into_iter().flatten() {
                if !seen.contains(&id) && added.insert(id) {
                    fresh.push(id);
                }
            }
            Ok(Series::new(CUSTOMER_ID, fresh))
        }
        DataType::Utf8 => {
            let seen: HashSet<&str> = merged_ids.utf8()?.into_iter().flatten().collect();
            let master_ca = master.utf8()?;
            let mut added: HashSet<&str> = HashSet::new();
            let mut fresh: Vec<String> = Vec::new();
            for id in master_ca.into_iter().flatten() {
                if !seen.contains(id) && added.insert(id) {
                    fresh.push(id.to_string());
                }
            }
            Ok(Series::new(CUSTOMER_ID, fresh))
        }
        other => Err(PipelineError::Schema(format!(
            "unsupported customer identifier dtype {other:?}"
        ))),
    }
}

/// Enrich the feature table with master attributes (name, city, whatever the
/// master carries) via a left join. Enrichment is optional: an unusable
/// master leaves the feature table as-is.
pub fn attach_customer_details(features: &DataFrame, customers: &DataFrame) -> Result<DataFrame> {
    let ids = features.column(CUSTOMER_ID)?;
    let columns = schema::column_names(customers);
    let id_col = match schema::resolve_master_customer_id(&columns) {
        Some(name) => name,
        None => return Ok(features.clone()),
    };
    let normalized = match schema::normalize_id_series(customers.column(&id_col)?) {
        Ok(series) => series,
        Err(_) => return Ok(features.clone()),
    };
    if normalized.dtype() != ids.dtype() {
        warn!("customer master identifier dtype differs from orders; skipping enrichment");
        return Ok(features.clone());
    }

    let mut master = customers.clone();
    master.with_column(normalized)?;
    let master = dedup_by_id(&master, &id_col)?;

    Ok(features.join(
        &master,
        [CUSTOMER_ID],
        [id_col.as_str()],
        JoinArgs::new(JoinType::Left),
    )?)
}

/// Keep the first master row per identifier so enrichment cannot multiply
/// feature rows.
fn dedup_by_id(master: &DataFrame, id_col: &str) -> Result<DataFrame> {
    let ids = master.column(id_col)?;
    let mut keep = Vec::with_capacity(master.height());
    match ids.dtype() {
        DataType::Int64 => {
            let mut seen: HashSet<i64> = HashSet::new();
            for id in ids.i64()? {
                keep.push(match id {
                    Some(v) => seen.insert(v),
                    None => false,
                });
            }
        }
        DataType::Utf8 => {
            let mut seen: HashSet<String> = HashSet::new();
            for id in ids.utf8()? {
                keep.push(match id {
                    Some(v) => seen.insert(v.to_string()),
                    None => false,
                });
            }
        }
        other => {
            return Err(PipelineError::Schema(format!(
                "unsupported customer identifier dtype {other:?}"
            )))
        }
    }
    let mask = BooleanChunked::from_slice("keep", &keep);
    Ok(master.filter(&mask)?)
}

/// Extract the clustering matrix, one row per feature-table row, columns in
/// [`FEATURE_COLUMNS`] order.
pub fn feature_matrix(frame: &DataFrame) -> Result<Array2<f64>> {
    let mut matrix = Array2::zeros((frame.height(), FEATURE_COLUMNS.len()));
    for (j, name) in FEATURE_COLUMNS.iter().enumerate() {
        let cast = frame.column(name)?.cast(&DataType::Float64)?;
        for (i, value) in cast.f64()?.into_iter().enumerate() {
            matrix[[i, j]] = value.unwrap_or(0.0);
        }
    }
    Ok(matrix)
}

/// Parse one raw timestamp into microseconds since the Unix epoch. Accepts
/// RFC 3339, the common dash and slash datetime layouts, and bare dates.
fn parse_timestamp_micros(raw: &str) -> Option<i64> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc).timestamp_micros());
    }
    const DATETIME_FORMATS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%m/%d/%Y %H:%M:%S",
        "%m/%d/%Y %H:%M",
    ];
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Some(dt.and_utc().timestamp_micros());
        }
    }
    for format in ["%Y-%m-%d", "%m/%d/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            return Some(date.and_hms_opt(0, 0, 0)?.and_utc().timestamp_micros());
        }
    }
    None
}

/// Tolerant conversion of a raw date column to epoch microseconds. Strings
/// go through the format list, numbers are read as epoch seconds, temporal
/// dtypes convert directly. Values that fit nothing become null; the second
/// return is how many non-null inputs were lost that way.
fn parse_timestamp_column(series: &Series) -> Result<(Series, usize)> {
    let values: Vec<Option<i64>> = match series.dtype() {
        DataType::Utf8 => series
            .utf8()?
            .into_iter()
            .map(|opt| opt.and_then(parse_timestamp_micros))
            .collect(),
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64 => {
            let cast = series.cast(&DataType::Int64)?;
            cast.i64()?
                .into_iter()
                .map(|opt| opt.and_then(|secs| secs.checked_mul(1_000_000)))
                .collect()
        }
        DataType::Float32 | DataType::Float64 => {
            let cast = series.cast(&DataType::Float64)?;
            cast.f64()?
                .into_iter()
                .map(|opt| {
                    opt.and_then(|secs| {
                        // Bound keeps the microsecond value inside i64.
                        if secs.is_finite() && secs.abs() < 9.0e12 {
                            Some((secs * 1_000_000.0) as i64)
                        } else {
                            None
                        }
                    })
                })
                .collect()
        }
        DataType::Datetime(unit, _) => {
            let ca = series.datetime()?;
            match unit {
                TimeUnit::Nanoseconds => ca.into_iter().map(|o| o.map(|v| v / 1_000)).collect(),
                TimeUnit::Microseconds => ca.into_iter().collect(),
                TimeUnit::Milliseconds => ca
                    .into_iter()
                    .map(|o| o.and_then(|v| v.checked_mul(1_000)))
                    .collect(),
            }
        }
        DataType::Date => series
            .date()?
            .into_iter()
            .map(|o| o.map(|days| days as i64 * MICROS_PER_DAY))
            .collect(),
        _ => vec![None; series.len()],
    };

    let input_non_null = series.len() - series.null_count();
    let output_non_null = values.iter().filter(|v| v.is_some()).count();
    let unparsable = input_non_null.saturating_sub(output_non_null);
    Ok((Series::new(ORDER_TS, values), unparsable))
}

fn format_timestamp(micros: i64) -> Option<String> {
    DateTime::from_timestamp_micros(micros).map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
}
