//! SQLite replace writer.
//!
//! Each call opens its own connection and closes it on return, success or not.
//! The drop, create and inserts run in one transaction, so readers see either
//! the previous relation or the new one. Values are converted before the
//! connection is opened; a conversion failure touches nothing.

use super::destination::Destination;
use super::{LoadError, LoadReport, ReplaceWriter};
use crate::table::{CanonicalTable, Cell, ColumnKind, ValueConversionError};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use tracing::{info, warn};

/// Column of a stored relation as SQLite reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredColumn {
    pub name: String,
    pub declared_type: String,
}

/// A relation read back from the store, rows in insertion order.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredTable {
    pub name: String,
    pub columns: Vec<StoredColumn>,
    pub rows: Vec<Vec<Cell>>,
}

/// SQLite-backed destination.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    destination: Destination,
}

impl SqliteStore {
    /// Parse a connection string. No connection is opened yet.
    pub fn open(url: &str) -> Result<Self, LoadError> {
        Ok(Self::new(Destination::parse(url)?))
    }

    pub fn new(destination: Destination) -> Self {
        Self { destination }
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    fn connect(&self) -> Result<Connection, LoadError> {
        let conn = match &self.destination {
            Destination::File(path) => Connection::open(path)?,
            Destination::Memory => {
                warn!("writing to an in-memory database; contents are discarded after the load");
                Connection::open_in_memory()?
            }
        };
        Ok(conn)
    }

    /// Read a relation back, or `None` if it does not exist.
    pub fn read_table(&self, table_name: &str) -> Result<Option<StoredTable>, LoadError> {
        check_table_name(table_name)?;
        let conn = self.connect()?;
        let ident = quote_ident(table_name);

        let mut info = conn.prepare(&format!("PRAGMA table_info({ident})"))?;
        let columns = info
            .query_map([], |row| {
                Ok(StoredColumn {
                    name: row.get(1)?,
                    declared_type: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        if columns.is_empty() {
            return Ok(None);
        }

        let width = columns.len();
        let mut select = conn.prepare(&format!("SELECT * FROM {ident} ORDER BY rowid"))?;
        let rows = select
            .query_map([], |row| {
                (0..width)
                    .map(|i| row.get::<_, Value>(i).map(from_sql_value))
                    .collect::<Result<Vec<_>, _>>()
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(StoredTable {
            name: table_name.to_string(),
            columns,
            rows,
        }))
    }
}

impl ReplaceWriter for SqliteStore {
    fn describe(&self) -> String {
        self.destination.to_string()
    }

    fn replace(&self, table_name: &str, table: &CanonicalTable) -> Result<LoadReport, LoadError> {
        check_table_name(table_name)?;

        let kinds = table.column_kinds()?;
        if kinds.is_empty() {
            return Err(ValueConversionError {
                column: table_name.to_string(),
                reason: "table has no columns".into(),
            }
            .into());
        }
        let rows: Vec<Vec<Value>> = table
            .rows()?
            .into_iter()
            .map(|row| row.into_iter().map(to_sql_value).collect())
            .collect();
        let fingerprint = table.fingerprint()?;

        let ident = quote_ident(table_name);
        let column_defs: Vec<String> = kinds
            .iter()
            .map(|(name, kind)| format!("{} {}", quote_ident(name), sql_type(*kind)))
            .collect();
        let column_list: Vec<String> = kinds.iter().map(|(name, _)| quote_ident(name)).collect();
        let placeholders: Vec<String> = (1..=kinds.len()).map(|i| format!("?{i}")).collect();

        let create_sql = format!("CREATE TABLE {ident} ({})", column_defs.join(", "));
        let insert_sql = format!(
            "INSERT INTO {ident} ({}) VALUES ({})",
            column_list.join(", "),
            placeholders.join(", ")
        );

        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        tx.execute(&format!("DROP TABLE IF EXISTS {ident}"), [])?;
        tx.execute(&create_sql, [])?;
        {
            let mut insert = tx.prepare(&insert_sql)?;
            for row in &rows {
                insert.execute(params_from_iter(row.iter()))?;
            }
        }
        tx.commit()?;

        info!(
            table = table_name,
            rows = rows.len(),
            destination = %self.destination,
            "replaced destination table"
        );

        Ok(LoadReport {
            table_name: table_name.to_string(),
            rows_written: rows.len(),
            columns: kinds.into_iter().map(|(name, _)| name).collect(),
            fingerprint,
        })
    }
}

fn check_table_name(name: &str) -> Result<(), LoadError> {
    if name.trim().is_empty() || name.contains('\0') {
        return Err(LoadError::InvalidTableName(name.to_string()));
    }
    Ok(())
}

/// Quote an identifier so names like `Opening Price` survive verbatim.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn sql_type(kind: ColumnKind) -> &'static str {
    match kind {
        ColumnKind::Integer => "INTEGER",
        ColumnKind::Real => "REAL",
        ColumnKind::Boolean => "BOOLEAN",
        ColumnKind::Text => "TEXT",
        ColumnKind::Date => "DATE",
    }
}

fn to_sql_value(cell: Cell) -> Value {
    match cell {
        Cell::Null => Value::Null,
        Cell::Integer(v) => Value::Integer(v),
        Cell::Real(v) => Value::Real(v),
        Cell::Boolean(v) => Value::Integer(i64::from(v)),
        Cell::Text(v) => Value::Text(v),
        Cell::Date(d) => Value::Text(d.format("%Y-%m-%d").to_string()),
    }
}

fn from_sql_value(value: Value) -> Cell {
    match value {
        Value::Null => Cell::Null,
        Value::Integer(v) => Cell::Integer(v),
        Value::Real(v) => Cell::Real(v),
        Value::Text(v) => Cell::Text(v),
        Value::Blob(bytes) => Cell::Text(format!("<{} bytes>", bytes.len())),
    }
}
