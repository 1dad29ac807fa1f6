//! End-to-end pipeline tests against real SQLite and CSV stores.

use std::fs;
use std::path::Path;

use polars::prelude::*;
use rusqlite::Connection;
use tempfile::{NamedTempFile, TempDir};

use rfm_segments::aggregate::TotalsStrategy;
use rfm_segments::{persist, pipeline, PipelineError, SegmentationConfig, SourceLocation};

/// Reference dataset. Customer 101 has two orders (totals 100 and 200,
/// quantities 1 and 2, last one 10 days before the dataset max date),
/// customer 102 has one order (total 50, 40 days before max), customer 103
/// exists only in the master. One order carries no customer at all; it
/// anchors the dataset max date without belonging to anyone.
fn scenario_db() -> NamedTempFile {
    let file = NamedTempFile::new().expect("temp db");
    let conn = Connection::open(file.path()).expect("open db");
    conn.execute_batch(
        "CREATE TABLE customers (customer_id INTEGER, name TEXT, city TEXT);
         INSERT INTO customers VALUES (101, 'Ada', 'London');
         INSERT INTO customers VALUES (102, 'Brin', 'Oslo');
         INSERT INTO customers VALUES (103, 'Cato', 'Porto');

         CREATE TABLE orders (order_id INTEGER, customer_id INTEGER, order_date TEXT);
         INSERT INTO orders VALUES (1001, 101, '2024-06-01 12:00:00');
         INSERT INTO orders VALUES (1002, 101, '2024-06-20 12:00:00');
         INSERT INTO orders VALUES (2001, 102, '2024-05-21 12:00:00');
         INSERT INTO orders VALUES (9099, NULL, '2024-06-30 12:00:00');

         CREATE TABLE order_items (order_id INTEGER, total_price REAL, quantity INTEGER);
         INSERT INTO order_items VALUES (1001, 100.0, 1);
         INSERT INTO order_items VALUES (1002, 120.0, 1);
         INSERT INTO order_items VALUES (1002, 80.0, 1);
         INSERT INTO order_items VALUES (2001, 50.0, 1);",
    )
    .expect("seed db");
    file
}

/// The same dataset as a directory of CSV exports.
fn scenario_csv_dir() -> TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(
        dir.path().join("customers.csv"),
        "customer_id,name,city\n101,Ada,London\n102,Brin,Oslo\n103,Cato,Porto\n",
    )
    .expect("customers.csv");
    fs::write(
        dir.path().join("orders.csv"),
        "order_id,customer_id,order_date\n\
         1001,101,2024-06-01 12:00:00\n\
         1002,101,2024-06-20 12:00:00\n\
         2001,102,2024-05-21 12:00:00\n\
         9099,,2024-06-30 12:00:00\n",
    )
    .expect("orders.csv");
    fs::write(
        dir.path().join("order_items.csv"),
        "order_id,total_price,quantity\n\
         1001,100.0,1\n1002,120.0,1\n1002,80.0,1\n2001,50.0,1\n",
    )
    .expect("order_items.csv");
    dir
}

fn config(source: SourceLocation, output_dir: &Path, clusters: usize) -> SegmentationConfig {
    SegmentationConfig {
        source,
        output_dir: output_dir.to_path_buf(),
        clusters,
        seed: 42,
        max_iterations: 300,
        tolerance: 1e-4,
    }
}

fn read_csv(path: &Path) -> DataFrame {
    CsvReader::from_path(path)
        .expect("open artifact")
        .finish()
        .expect("parse artifact")
}

fn row_for(frame: &DataFrame, customer: i64) -> Option<usize> {
    let ids = frame.column("customer_id").unwrap().i64().unwrap();
    (0..frame.height()).find(|&i| ids.get(i) == Some(customer))
}

fn get_f64(frame: &DataFrame, column: &str, row: usize) -> f64 {
    frame
        .column(column)
        .unwrap()
        .cast(&DataType::Float64)
        .unwrap()
        .f64()
        .unwrap()
        .get(row)
        .unwrap()
}

#[test]
fn sqlite_end_to_end_computes_reference_features() {
    let db = scenario_db();
    let out = tempfile::tempdir().unwrap();
    let cfg = config(
        SourceLocation::Sqlite(db.path().to_path_buf()),
        out.path(),
        2,
    );

    let report = pipeline::run(&cfg).unwrap();
    assert_eq!(report.totals_strategy, TotalsStrategy::PrecomputedTotal);
    assert_eq!(report.orders_dropped_null_customer, 1);
    assert_eq!(report.orderless_master_customers, 1);
    assert_eq!(report.customers_total, 3);
    assert_eq!(report.customers_retained, 2);
    assert_eq!(report.customers_dropped_inactive, 1);
    for path in &report.artifacts {
        assert!(path.exists(), "missing artifact {}", path.display());
    }

    let aggregates = read_csv(&out.path().join(persist::AGGREGATES_FILE));
    assert_eq!(aggregates.height(), 3);

    let a = row_for(&aggregates, 101).expect("customer 101");
    assert_eq!(get_f64(&aggregates, "total_orders", a), 2.0);
    assert!((get_f64(&aggregates, "total_sales", a) - 300.0).abs() < 1e-9);
    assert!((get_f64(&aggregates, "total_quantity", a) - 3.0).abs() < 1e-9);
    assert!((get_f64(&aggregates, "avg_order_value", a) - 150.0).abs() < 1e-9);
    assert!((get_f64(&aggregates, "recency_days", a) - 10.0).abs() < 1e-9);

    let b = row_for(&aggregates, 102).expect("customer 102");
    assert_eq!(get_f64(&aggregates, "total_orders", b), 1.0);
    assert!((get_f64(&aggregates, "total_sales", b) - 50.0).abs() < 1e-9);
    assert!((get_f64(&aggregates, "recency_days", b) - 40.0).abs() < 1e-9);

    let c = row_for(&aggregates, 103).expect("customer 103");
    assert_eq!(get_f64(&aggregates, "total_orders", c), 0.0);
    assert!((get_f64(&aggregates, "total_sales", c)).abs() < 1e-9);
    assert!((get_f64(&aggregates, "recency_days", c) - 9999.0).abs() < 1e-9);

    // Average order value times order count reproduces total sales for
    // customers with orders.
    for row in [a, b] {
        let product =
            get_f64(&aggregates, "avg_order_value", row) * get_f64(&aggregates, "total_orders", row);
        assert!((product - get_f64(&aggregates, "total_sales", row)).abs() < 1e-6);
    }

    // Master attributes came along.
    assert_eq!(
        aggregates.column("name").unwrap().utf8().unwrap().get(a),
        Some("Ada")
    );

    // The inactive customer is clustered nowhere.
    let segments = read_csv(&out.path().join(persist::SEGMENTS_FILE));
    assert_eq!(segments.height(), 2);
    assert!(row_for(&segments, 103).is_none());
    let labels = segments.column("cluster").unwrap().i64().unwrap();
    for i in 0..segments.height() {
        let label = labels.get(i).unwrap();
        assert!((0..2).contains(&label));
    }

    // One summary row per cluster; customer counts add up to the retained.
    let summary = read_csv(&out.path().join(persist::SUMMARY_FILE));
    assert_eq!(summary.height(), 2);
    let counts = summary.column("n_customers").unwrap().i64().unwrap();
    let total: i64 = (0..summary.height()).map(|i| counts.get(i).unwrap()).sum();
    assert_eq!(total, 2);
}

#[test]
fn identical_seeds_reproduce_segments() {
    let db = scenario_db();
    let location = SourceLocation::Sqlite(db.path().to_path_buf());

    let first_out = tempfile::tempdir().unwrap();
    let second_out = tempfile::tempdir().unwrap();
    let first = pipeline::run(&config(location.clone(), first_out.path(), 2)).unwrap();
    let second = pipeline::run(&config(location, second_out.path(), 2)).unwrap();

    assert_eq!(first.cluster_sizes, second.cluster_sizes);
    assert!((first.inertia - second.inertia).abs() < 1e-12);

    let read_labels = |dir: &Path| -> Vec<(i64, i64)> {
        let segments = read_csv(&dir.join(persist::SEGMENTS_FILE));
        let ids = segments.column("customer_id").unwrap().i64().unwrap();
        let labels = segments.column("cluster").unwrap().i64().unwrap();
        (0..segments.height())
            .map(|i| (ids.get(i).unwrap(), labels.get(i).unwrap()))
            .collect()
    };
    assert_eq!(read_labels(first_out.path()), read_labels(second_out.path()));
}

#[test]
fn csv_export_matches_sqlite_run() {
    let db = scenario_db();
    let csv = scenario_csv_dir();

    let db_out = tempfile::tempdir().unwrap();
    let csv_out = tempfile::tempdir().unwrap();
    pipeline::run(&config(
        SourceLocation::Sqlite(db.path().to_path_buf()),
        db_out.path(),
        2,
    ))
    .unwrap();
    pipeline::run(&config(
        SourceLocation::CsvDir(csv.path().to_path_buf()),
        csv_out.path(),
        2,
    ))
    .unwrap();

    let from_db = read_csv(&db_out.path().join(persist::AGGREGATES_FILE));
    let from_csv = read_csv(&csv_out.path().join(persist::AGGREGATES_FILE));
    assert_eq!(from_db.height(), from_csv.height());
    for customer in [101i64, 102, 103] {
        let i = row_for(&from_db, customer).unwrap();
        let j = row_for(&from_csv, customer).unwrap();
        for column in ["total_orders", "total_sales", "avg_order_value", "recency_days"] {
            let db_value = get_f64(&from_db, column, i);
            let csv_value = get_f64(&from_csv, column, j);
            assert!(
                (db_value - csv_value).abs() < 1e-9,
                "{column} differs for {customer}: {db_value} vs {csv_value}"
            );
        }
    }
}

#[test]
fn fallback_pricing_is_used_when_totals_are_missing() {
    let file = NamedTempFile::new().expect("temp db");
    let conn = Connection::open(file.path()).expect("open db");
    conn.execute_batch(
        "CREATE TABLE customers (customer_id INTEGER, name TEXT);
         INSERT INTO customers VALUES (7, 'Solo');

         CREATE TABLE orders (order_id INTEGER, customer_id INTEGER, order_date TEXT);
         INSERT INTO orders VALUES (1, 7, '2024-06-30 12:00:00');

         CREATE TABLE order_items (order_id INTEGER, list_price REAL, quantity INTEGER, discount REAL);
         INSERT INTO order_items VALUES (1, 100.0, 2, 0.5);
         INSERT INTO order_items VALUES (1, 30.0, 1, NULL);",
    )
    .expect("seed db");
    drop(conn);

    let out = tempfile::tempdir().unwrap();
    let cfg = config(SourceLocation::Sqlite(file.path().to_path_buf()), out.path(), 1);
    let report = pipeline::run(&cfg).unwrap();
    assert_eq!(report.totals_strategy, TotalsStrategy::PriceTimesQuantity);

    let aggregates = read_csv(&out.path().join(persist::AGGREGATES_FILE));
    let row = row_for(&aggregates, 7).unwrap();
    // 100 * 2 * (1 - 0.5) + 30 * 1 * (1 - 0)
    assert!((get_f64(&aggregates, "total_sales", row) - 130.0).abs() < 1e-9);
    assert!((get_f64(&aggregates, "total_quantity", row) - 3.0).abs() < 1e-9);
}

#[test]
fn missing_pricing_columns_abort_before_artifacts() {
    let file = NamedTempFile::new().expect("temp db");
    let conn = Connection::open(file.path()).expect("open db");
    conn.execute_batch(
        "CREATE TABLE customers (customer_id INTEGER);
         INSERT INTO customers VALUES (1);

         CREATE TABLE orders (order_id INTEGER, customer_id INTEGER, order_date TEXT);
         INSERT INTO orders VALUES (1, 1, '2024-06-30 12:00:00');

         CREATE TABLE order_items (order_id INTEGER, unit_cost REAL, quantity INTEGER);
         INSERT INTO order_items VALUES (1, 5.0, 1);",
    )
    .expect("seed db");
    drop(conn);

    let out = tempfile::tempdir().unwrap();
    let cfg = config(SourceLocation::Sqlite(file.path().to_path_buf()), out.path(), 2);
    let err = pipeline::run(&cfg).unwrap_err();
    assert!(matches!(err, PipelineError::Schema(_)));
    assert!(!out.path().join(persist::AGGREGATES_FILE).exists());
    assert!(!out.path().join(persist::SEGMENTS_FILE).exists());
}

#[test]
fn too_few_active_customers_is_insufficient_data() {
    let db = scenario_db();
    let out = tempfile::tempdir().unwrap();
    // Only two active customers but four clusters requested.
    let cfg = config(
        SourceLocation::Sqlite(db.path().to_path_buf()),
        out.path(),
        4,
    );

    let err = pipeline::run(&cfg).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::InsufficientData {
            rows: 2,
            clusters: 4
        }
    ));
    // The feature table had already been persisted; clustering artifacts
    // were not.
    assert!(out.path().join(persist::AGGREGATES_FILE).exists());
    assert!(!out.path().join(persist::SEGMENTS_FILE).exists());
    assert!(!out.path().join(persist::SUMMARY_FILE).exists());
}
