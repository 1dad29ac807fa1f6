//! Table loading collaborators.
//!
//! The pipeline needs three row sets handed to it as DataFrames; everything
//! algorithmic happens downstream and never touches the store again. Two
//! stores are supported: a SQLite database (the usual deployment shape) and
//! a directory of CSV exports with the same table names.

use std::path::{Path, PathBuf};

use polars::prelude::*;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use tracing::info;

use crate::config::SourceLocation;
use crate::error::{PipelineError, Result};

/// Names of the row sets the pipeline requires.
pub const ORDERS: &str = "orders";
pub const ORDER_ITEMS: &str = "order_items";
pub const CUSTOMERS: &str = "customers";

/// A queryable store exposing named row sets.
///
/// Loading is all-or-nothing: any failure means the row set is unavailable,
/// there is no partial retrieval.
pub trait TableSource {
    fn load_table(&self, name: &str) -> Result<DataFrame>;
}

/// Build the source collaborator for a configured location.
pub fn open_source(location: &SourceLocation) -> Result<Box<dyn TableSource>> {
    match location {
        SourceLocation::Sqlite(path) => Ok(Box::new(SqliteSource::open(path)?)),
        SourceLocation::CsvDir(dir) => Ok(Box::new(CsvDirSource::new(dir.clone()))),
    }
}

/// SQLite-backed source.
#[derive(Debug)]
pub struct SqliteSource {
    conn: Connection,
}

impl SqliteSource {
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PipelineError::DataUnavailable(format!(
                "database file not found at {}",
                path.display()
            )));
        }
        let conn = Connection::open(path)?;
        Ok(Self { conn })
    }
}

/// One buffered cell from a SQLite row. SQLite columns are dynamically
/// typed, so the column dtype is decided only after the whole table has
/// been scanned.
#[derive(Debug, Clone)]
enum Cell {
    Null,
    Int(i64),
    Real(f64),
    Text(String),
}

fn cell_to_i64(cell: Cell) -> Option<i64> {
    match cell {
        Cell::Int(v) => Some(v),
        _ => None,
    }
}

fn cell_to_f64(cell: Cell) -> Option<f64> {
    match cell {
        Cell::Int(v) => Some(v as f64),
        Cell::Real(v) => Some(v),
        _ => None,
    }
}

fn cell_to_string(cell: Cell) -> Option<String> {
    match cell {
        Cell::Int(v) => Some(v.to_string()),
        Cell::Real(v) => Some(v.to_string()),
        Cell::Text(v) => Some(v),
        Cell::Null => None,
    }
}

/// Promote a buffered column to the narrowest dtype that fits every cell:
/// all-integer stays `Int64`, any real makes it `Float64`, any text makes
/// the whole column `Utf8` with numbers rendered as text.
fn build_series(name: &str, cells: Vec<Cell>) -> Series {
    let mut saw_real = false;
    let mut saw_text = false;
    for cell in &cells {
        match cell {
            Cell::Real(_) => saw_real = true,
            Cell::Text(_) => saw_text = true,
            _ => {}
        }
    }
    if saw_text {
        let values: Vec<Option<String>> = cells.into_iter().map(cell_to_string).collect();
        Series::new(name, values)
    } else if saw_real {
        let values: Vec<Option<f64>> = cells.into_iter().map(cell_to_f64).collect();
        Series::new(name, values)
    } else {
        let values: Vec<Option<i64>> = cells.into_iter().map(cell_to_i64).collect();
        Series::new(name, values)
    }
}

impl TableSource for SqliteSource {
    fn load_table(&self, name: &str) -> Result<DataFrame> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT * FROM \"{name}\""))
            .map_err(|e| {
                PipelineError::DataUnavailable(format!("cannot read table '{name}': {e}"))
            })?;
        let names: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(|s| s.to_string())
            .collect();
        let mut columns: Vec<Vec<Cell>> = vec![Vec::new(); names.len()];

        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            for (idx, column) in columns.iter_mut().enumerate() {
                let cell = match row.get_ref(idx)? {
                    ValueRef::Null => Cell::Null,
                    ValueRef::Integer(v) => Cell::Int(v),
                    ValueRef::Real(v) => Cell::Real(v),
                    ValueRef::Text(v) => Cell::Text(String::from_utf8_lossy(v).into_owned()),
                    // Blobs have no tabular meaning here.
                    ValueRef::Blob(_) => Cell::Null,
                };
                column.push(cell);
            }
        }

        let series: Vec<Series> = names
            .iter()
            .zip(columns)
            .map(|(name, cells)| build_series(name, cells))
            .collect();
        let frame = DataFrame::new(series)?;
        info!(table = name, rows = frame.height(), "loaded row set");
        Ok(frame)
    }
}

/// CSV-directory source: `<dir>/<table>.csv`, header row, inferred schema.
#[derive(Debug)]
pub struct CsvDirSource {
    dir: PathBuf,
}

impl CsvDirSource {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

impl TableSource for CsvDirSource {
    fn load_table(&self, name: &str) -> Result<DataFrame> {
        let path = self.dir.join(format!("{name}.csv"));
        if !path.exists() {
            return Err(PipelineError::DataUnavailable(format!(
                "missing CSV export: {}",
                path.display()
            )));
        }
        let frame = CsvReader::from_path(&path)
            .map_err(|e| {
                PipelineError::DataUnavailable(format!("cannot open {}: {e}", path.display()))
            })?
            .finish()
            .map_err(|e| {
                PipelineError::DataUnavailable(format!("cannot parse {}: {e}", path.display()))
            })?;
        info!(
            table = name,
            rows = frame.height(),
            path = %path.display(),
            "loaded row set"
        );
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn fixture_db() -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().expect("temp db");
        let conn = Connection::open(file.path()).expect("open db");
        conn.execute_batch(
            "CREATE TABLE orders (order_id INTEGER, customer_id INTEGER, order_date TEXT, weight REAL);
             INSERT INTO orders VALUES (1, 10, '2024-01-01', 1.5);
             INSERT INTO orders VALUES (2, NULL, '2024-01-02', 2);
             INSERT INTO orders VALUES (3, 11, NULL, NULL);",
        )
        .expect("seed db");
        file
    }

    #[test]
    fn sqlite_columns_promote_to_stable_dtypes() {
        let file = fixture_db();
        let source = SqliteSource::open(file.path()).unwrap();
        let frame = source.load_table("orders").unwrap();

        assert_eq!(frame.height(), 3);
        assert_eq!(frame.column("order_id").unwrap().dtype(), &DataType::Int64);
        // Mixed INTEGER and REAL cells widen the whole column to floats.
        assert_eq!(frame.column("weight").unwrap().dtype(), &DataType::Float64);
        assert_eq!(frame.column("order_date").unwrap().dtype(), &DataType::Utf8);
        assert_eq!(frame.column("customer_id").unwrap().null_count(), 1);
    }

    #[test]
    fn sqlite_missing_table_is_data_unavailable() {
        let file = fixture_db();
        let source = SqliteSource::open(file.path()).unwrap();
        let err = source.load_table("no_such_table").unwrap_err();
        assert!(matches!(err, PipelineError::DataUnavailable(_)));
    }

    #[test]
    fn sqlite_missing_file_is_data_unavailable() {
        let err = SqliteSource::open(Path::new("/nonexistent/retail.db")).unwrap_err();
        assert!(matches!(err, PipelineError::DataUnavailable(_)));
    }

    #[test]
    fn csv_directory_loads_named_tables() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(
            dir.path().join("customers.csv"),
            "customer_id,name\n1,Alice\n2,Bob\n",
        )
        .expect("write csv");

        let source = CsvDirSource::new(dir.path().to_path_buf());
        let frame = source.load_table("customers").unwrap();
        assert_eq!(frame.height(), 2);
        assert_eq!(
            frame.column("customer_id").unwrap().dtype(),
            &DataType::Int64
        );

        let err = source.load_table("orders").unwrap_err();
        assert!(matches!(err, PipelineError::DataUnavailable(_)));
    }
}
