//! Load stage: persist a [`CanonicalTable`] with replace semantics.
//!
//! The loader is only ever handed a table that exists; a failed upstream stage
//! stops the run before the loader is reached. `ReplaceWriter` is the single
//! capability the pipeline needs. An append or merge writer would be a separate
//! trait, leaving this contract untouched.

pub mod destination;
pub mod sqlite;

pub use destination::Destination;
pub use sqlite::{SqliteStore, StoredColumn, StoredTable};

use crate::table::{CanonicalTable, ValueConversionError};
use thiserror::Error;

/// Relation written when no name is configured.
pub const DEFAULT_TABLE_NAME: &str = "new_table";

/// Why a load did not complete. A failed load leaves the prior relation intact.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LoadError {
    #[error("store write failed: {0}")]
    StoreWrite(String),

    #[error(transparent)]
    ValueConversion(#[from] ValueConversionError),

    #[error("unsupported destination: {0}")]
    UnsupportedDestination(String),

    #[error("invalid table name '{0}'")]
    InvalidTableName(String),

    #[error("upstream stage failed: {0}")]
    Upstream(String),
}

impl LoadError {
    /// Stable reason code for logs and reports.
    pub fn code(&self) -> &'static str {
        match self {
            LoadError::StoreWrite(_) => "StoreWriteFailure",
            LoadError::ValueConversion(_) => "ValueConversionFailure",
            LoadError::UnsupportedDestination(_) => "UnsupportedDestination",
            LoadError::InvalidTableName(_) => "InvalidTableName",
            LoadError::Upstream(_) => "UpstreamFailure",
        }
    }
}

impl From<rusqlite::Error> for LoadError {
    fn from(err: rusqlite::Error) -> Self {
        LoadError::StoreWrite(err.to_string())
    }
}

/// Outcome of a successful replace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadReport {
    pub table_name: String,
    pub rows_written: usize,
    pub columns: Vec<String>,
    /// Content hash of the table that was written.
    pub fingerprint: String,
}

/// Atomically swap a relation's definition and contents for a new table.
///
/// Re-invoking with the same table leaves the relation in the same state.
pub trait ReplaceWriter: Send + Sync {
    /// Human-readable destination, safe to log.
    fn describe(&self) -> String;

    fn replace(&self, table_name: &str, table: &CanonicalTable) -> Result<LoadReport, LoadError>;
}

/// Replace `table_name` (default `new_table`) at `destination_url` with `table`.
pub fn load(
    table: &CanonicalTable,
    destination_url: &str,
    table_name: Option<&str>,
) -> Result<LoadReport, LoadError> {
    let store = SqliteStore::open(destination_url)?;
    store.replace(table_name.unwrap_or(DEFAULT_TABLE_NAME), table)
}
