//! Heuristic column resolution.
//!
//! Input tables come from stores whose column names are not guaranteed, so
//! each required role (order date, order identifier, customer identifier) is
//! resolved against a priority list of well-known spellings first and a
//! substring fallback second. Resolution is pure and deterministic: the
//! first priority hit wins, otherwise the first fallback hit in the table's
//! own column order. Priority names must match exactly; the substring
//! fallback is case-insensitive.

use polars::prelude::*;

use crate::error::{PipelineError, Result};

/// Canonical customer identifier column. Only this exact name is accepted
/// on the orders table; anything else risks rolling orders up under the
/// wrong entity.
pub const CUSTOMER_ID: &str = "customer_id";

/// Exact names tried first when looking for the order-date column.
const DATE_PRIORITY: [&str; 7] = [
    "order_date",
    "orderdate",
    "date",
    "order_date_placed",
    "created_at",
    "order_datetime",
    "shipped_date",
];

/// Substrings that mark a column as date-like when no exact name matches.
const DATE_FALLBACK: [&str; 3] = ["date", "dt", "time"];

const ORDER_ID_PRIORITY: [&str; 1] = ["order_id"];
const ORDER_ID_FALLBACK: [&str; 1] = ["id"];

/// Owned column names of a frame, in the frame's own order.
pub fn column_names(frame: &DataFrame) -> Vec<String> {
    frame
        .get_column_names()
        .into_iter()
        .map(|name| name.to_string())
        .collect()
}

/// Resolve the column that plays the order-date role.
pub fn resolve_date_column(table: &str, columns: &[String]) -> Result<String> {
    resolve(table, "date", columns, &DATE_PRIORITY, &DATE_FALLBACK)
}

/// Resolve the column that plays the order-identifier role.
pub fn resolve_order_id_column(table: &str, columns: &[String]) -> Result<String> {
    resolve(
        table,
        "order id",
        columns,
        &ORDER_ID_PRIORITY,
        &ORDER_ID_FALLBACK,
    )
}

/// Require the exact customer identifier column.
pub fn require_customer_id(table: &str, columns: &[String]) -> Result<String> {
    if columns.iter().any(|c| c == CUSTOMER_ID) {
        Ok(CUSTOMER_ID.to_string())
    } else {
        Err(PipelineError::schema_with_columns(
            &format!("'{table}' does not have a usable '{CUSTOMER_ID}' column"),
            columns,
        ))
    }
}

/// Customer identifier on the customer master table. The master is only an
/// enrichment join source, so unlike the orders side any id-like column is
/// tolerated. `None` means the master carries no identifier at all.
pub fn resolve_master_customer_id(columns: &[String]) -> Option<String> {
    if columns.iter().any(|c| c == CUSTOMER_ID) {
        return Some(CUSTOMER_ID.to_string());
    }
    columns
        .iter()
        .find(|c| c.to_lowercase().contains("id"))
        .cloned()
}

/// Cast an identifier column to one of the two supported dtypes: integers
/// widen to `Int64`, strings stay `Utf8`, floats (a common artifact of CSV
/// inference over sparse id columns) truncate to `Int64`.
pub fn normalize_id_series(series: &Series) -> Result<Series> {
    match series.dtype() {
        DataType::Int64 | DataType::Utf8 => Ok(series.clone()),
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64
        | DataType::Float32
        | DataType::Float64 => Ok(series.cast(&DataType::Int64)?),
        other => Err(PipelineError::Schema(format!(
            "identifier column '{}' has unsupported dtype {other:?}",
            series.name()
        ))),
    }
}

fn resolve(
    table: &str,
    role: &str,
    columns: &[String],
    priority: &[&str],
    fallback_substrings: &[&str],
) -> Result<String> {
    for candidate in priority {
        if columns.iter().any(|c| c == candidate) {
            return Ok((*candidate).to_string());
        }
    }
    for column in columns {
        let lower = column.to_lowercase();
        if fallback_substrings.iter().any(|s| lower.contains(s)) {
            return Ok(column.clone());
        }
    }
    Err(PipelineError::schema_with_columns(
        &format!("no {role}-like column found in '{table}'"),
        columns,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn date_priority_beats_listing_order() {
        // Both candidates present: the earlier priority entry wins even
        // though the other one appears first in the table.
        let columns = names(&["orderdate", "order_date"]);
        let resolved = resolve_date_column("orders", &columns).unwrap();
        assert_eq!(resolved, "order_date");
    }

    #[test]
    fn date_fallback_picks_first_match_in_table_order() {
        let columns = names(&["id", "ship_dt", "created_time"]);
        let resolved = resolve_date_column("orders", &columns).unwrap();
        assert_eq!(resolved, "ship_dt");
    }

    #[test]
    fn date_fallback_is_case_insensitive() {
        let columns = names(&["OrderDate"]);
        let resolved = resolve_date_column("orders", &columns).unwrap();
        assert_eq!(resolved, "OrderDate");
    }

    #[test]
    fn missing_date_column_reports_what_was_available() {
        let columns = names(&["order_id", "status"]);
        let err = resolve_date_column("orders", &columns).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("orders"));
        assert!(message.contains("order_id, status"));
    }

    #[test]
    fn order_id_fallback_accepts_any_id_column() {
        let columns = names(&["oid", "order_date"]);
        let resolved = resolve_order_id_column("orders", &columns).unwrap();
        assert_eq!(resolved, "oid");
    }

    #[test]
    fn customer_id_requires_exact_name() {
        assert!(require_customer_id("orders", &names(&["customer_id"])).is_ok());
        assert!(require_customer_id("orders", &names(&["CustomerId"])).is_err());
    }

    #[test]
    fn master_id_tolerates_loose_names() {
        assert_eq!(
            resolve_master_customer_id(&names(&["cust_id", "name"])),
            Some("cust_id".to_string())
        );
        assert_eq!(resolve_master_customer_id(&names(&["name", "email"])), None);
    }

    #[test]
    fn id_dtypes_normalize_to_int64_or_utf8() {
        let ints = Series::new("id", &[1i32, 2, 3]);
        assert_eq!(normalize_id_series(&ints).unwrap().dtype(), &DataType::Int64);

        let floats = Series::new("id", &[1.0f64, 2.0]);
        assert_eq!(
            normalize_id_series(&floats).unwrap().dtype(),
            &DataType::Int64
        );

        let text = Series::new("id", &["a", "b"]);
        assert_eq!(normalize_id_series(&text).unwrap().dtype(), &DataType::Utf8);

        let bools = Series::new("id", &[true, false]);
        assert!(normalize_id_series(&bools).is_err());
    }
}
