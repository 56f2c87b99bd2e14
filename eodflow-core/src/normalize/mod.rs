//! Normalization stage: validate a raw payload and reshape it into a
//! [`CanonicalTable`].
//!
//! Validation short-circuits with a reason code. Everything after validation is
//! row-level filtering: a row is dropped whole when any kept column is null or
//! its date does not parse. Ending up with zero rows is still a success.

pub mod dates;
mod frame;
pub mod schema;

use crate::fetch::RawPayload;
use crate::table::{date_to_epoch_days, CanonicalTable};
use polars::prelude::*;
use schema::{canonical_name, DATA_FIELD, DATE_COLUMN, RENAMED_COLUMNS};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Why a payload could not be normalized.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum NormalizeError {
    #[error("payload does not contain a 'data' field")]
    MissingDataField,

    #[error("no records available for the requested symbols")]
    EmptyResultSet,

    #[error("'data' field is {found}, expected a sequence of records")]
    MalformedDataField { found: &'static str },

    #[error("record {index} is not an object")]
    MalformedRecord { index: usize },

    #[error("dataframe operation failed: {0}")]
    Frame(String),

    #[error("upstream stage failed: {0}")]
    Upstream(String),
}

impl NormalizeError {
    /// Stable reason code for logs and reports.
    pub fn code(&self) -> &'static str {
        match self {
            NormalizeError::MissingDataField => "MissingDataField",
            NormalizeError::EmptyResultSet => "EmptyResultSet",
            NormalizeError::MalformedDataField { .. } => "MalformedDataField",
            NormalizeError::MalformedRecord { .. } => "MalformedRecord",
            NormalizeError::Frame(_) => "FrameError",
            NormalizeError::Upstream(_) => "UpstreamFailure",
        }
    }
}

impl From<PolarsError> for NormalizeError {
    fn from(e: PolarsError) -> Self {
        NormalizeError::Frame(e.to_string())
    }
}

/// Row accounting for a single normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizeStats {
    pub input_records: usize,
    pub dropped_null_rows: usize,
    pub dropped_bad_dates: usize,
}

impl NormalizeStats {
    pub fn kept_rows(&self) -> usize {
        self.input_records - self.dropped_null_rows - self.dropped_bad_dates
    }
}

/// Stateless normalizer for end-of-day payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct Normalizer;

impl Normalizer {
    pub fn new() -> Self {
        Self
    }

    /// Validate and reshape a payload.
    pub fn normalize(&self, payload: &RawPayload) -> Result<CanonicalTable, NormalizeError> {
        let records = extract_records(payload.as_value())?;
        let mut stats = NormalizeStats {
            input_records: records.len(),
            ..NormalizeStats::default()
        };

        let columns = frame::kept_columns(&records);
        let df = frame::build_frame(&records, &columns)?;

        let df = df.drop_nulls::<String>(None)?;
        stats.dropped_null_rows = stats.input_records - df.height();

        let before = df.height();
        let mut df = parse_dates(df)?;
        stats.dropped_bad_dates = before - df.height();

        for (from, to) in RENAMED_COLUMNS {
            if df.get_column_index(from).is_some() {
                df.rename(from, to.into())?;
            }
        }

        if stats.dropped_null_rows > 0 || stats.dropped_bad_dates > 0 {
            warn!(
                input = stats.input_records,
                dropped_nulls = stats.dropped_null_rows,
                dropped_dates = stats.dropped_bad_dates,
                "dropped incomplete rows"
            );
        }
        info!(
            rows = df.height(),
            columns = df.width(),
            "normalized payload"
        );
        debug!(columns = ?columns.iter().map(|c| canonical_name(c)).collect::<Vec<_>>());

        Ok(CanonicalTable::with_stats(df, stats))
    }
}

/// Payload shape checks, in order: object with `data`, non-empty sequence,
/// every element an object.
fn extract_records(payload: &Value) -> Result<Vec<&Map<String, Value>>, NormalizeError> {
    let data = payload
        .as_object()
        .and_then(|obj| obj.get(DATA_FIELD))
        .ok_or(NormalizeError::MissingDataField)?;

    let items = match data {
        Value::Null => return Err(NormalizeError::EmptyResultSet),
        Value::Array(items) => items,
        other => {
            return Err(NormalizeError::MalformedDataField {
                found: json_kind(other),
            })
        }
    };

    if items.is_empty() {
        return Err(NormalizeError::EmptyResultSet);
    }

    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            item.as_object()
                .ok_or(NormalizeError::MalformedRecord { index })
        })
        .collect()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Replace the date column with a parsed `Date` column and drop rows that
/// failed to parse.
fn parse_dates(mut df: DataFrame) -> Result<DataFrame, NormalizeError> {
    let raw = df.column(DATE_COLUMN)?.as_materialized_series();
    let raw = if raw.dtype() == &DataType::String {
        raw.clone()
    } else {
        raw.cast(&DataType::String)?
    };

    let days: Vec<Option<i32>> = raw
        .str()?
        .into_iter()
        .map(|v| v.and_then(dates::parse_trading_date).map(date_to_epoch_days))
        .collect();

    let parsed = Column::new(DATE_COLUMN.into(), days).cast(&DataType::Date)?;
    df.with_column(parsed)?;

    let mask = df.column(DATE_COLUMN)?.is_not_null();
    Ok(df.filter(&mask)?)
}
