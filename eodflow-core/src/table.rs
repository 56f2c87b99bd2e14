//! Canonical table: the validated, renamed, null-free rows handed to the loader.
//!
//! Wraps a Polars `DataFrame`. The frame's dtypes are narrowed to a small set of
//! storable kinds here, so every consumer (SQL writer, CSV export, fingerprint)
//! shares one conversion path.

use crate::normalize::NormalizeStats;
use chrono::{Datelike, NaiveDate};
use polars::prelude::*;
use std::fmt;
use std::io;
use thiserror::Error;

/// Days between 0001-01-01 (CE day 1) and 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// Convert a calendar date to the physical representation of a Polars `Date`.
pub(crate) fn date_to_epoch_days(date: NaiveDate) -> i32 {
    date.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE
}

fn epoch_days_to_date(days: i32) -> Option<NaiveDate> {
    NaiveDate::from_num_days_from_ce_opt(days.checked_add(UNIX_EPOCH_DAYS_FROM_CE)?)
}

/// Storable kind of a table column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    Real,
    Boolean,
    Text,
    Date,
}

/// A single typed value of a table row.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Integer(i64),
    Real(f64),
    Boolean(bool),
    Text(String),
    Date(NaiveDate),
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => Ok(()),
            Cell::Integer(v) => write!(f, "{v}"),
            Cell::Real(v) => write!(f, "{v:?}"),
            Cell::Boolean(v) => write!(f, "{v}"),
            Cell::Text(v) => f.write_str(v),
            Cell::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
        }
    }
}

/// A column or value the storage layer cannot represent.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("cannot convert column '{column}': {reason}")]
pub struct ValueConversionError {
    pub column: String,
    pub reason: String,
}

impl ValueConversionError {
    fn new(column: &str, reason: impl Into<String>) -> Self {
        Self {
            column: column.to_string(),
            reason: reason.into(),
        }
    }
}

/// Errors from exporting a table as CSV.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    Value(#[from] ValueConversionError),

    #[error("csv write failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("csv flush failed: {0}")]
    Io(#[from] io::Error),
}

/// The output of normalization. May hold zero rows.
#[derive(Debug, Clone)]
pub struct CanonicalTable {
    frame: DataFrame,
    stats: NormalizeStats,
}

impl CanonicalTable {
    /// Wrap a frame produced outside the normalizer (tests, alternate producers).
    pub fn from_frame(frame: DataFrame) -> Self {
        let stats = NormalizeStats {
            input_records: frame.height(),
            ..NormalizeStats::default()
        };
        Self { frame, stats }
    }

    pub(crate) fn with_stats(frame: DataFrame, stats: NormalizeStats) -> Self {
        Self { frame, stats }
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn into_frame(self) -> DataFrame {
        self.frame
    }

    pub fn stats(&self) -> &NormalizeStats {
        &self.stats
    }

    pub fn height(&self) -> usize {
        self.frame.height()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.height() == 0
    }

    pub fn column_names(&self) -> Vec<String> {
        self.frame
            .get_column_names()
            .into_iter()
            .map(|name| name.to_string())
            .collect()
    }

    /// Storable kind of each column, in column order.
    pub fn column_kinds(&self) -> Result<Vec<(String, ColumnKind)>, ValueConversionError> {
        self.frame
            .get_columns()
            .iter()
            .map(|column| {
                let name = column.name().to_string();
                let kind = kind_of(&name, column.dtype())?;
                Ok((name, kind))
            })
            .collect()
    }

    /// Materialize every row as typed cells.
    ///
    /// Fails on the first column whose dtype or values have no storable form.
    pub fn rows(&self) -> Result<Vec<Vec<Cell>>, ValueConversionError> {
        let height = self.frame.height();
        let width = self.frame.width();
        let mut rows: Vec<Vec<Cell>> = (0..height).map(|_| Vec::with_capacity(width)).collect();

        for column in self.frame.get_columns() {
            let cells = column_cells(column)?;
            for (row, cell) in rows.iter_mut().zip(cells) {
                row.push(cell);
            }
        }

        Ok(rows)
    }

    /// Content hash over column names, kinds and every cell.
    ///
    /// Two tables with the same fingerprint load to identical relations.
    pub fn fingerprint(&self) -> Result<String, ValueConversionError> {
        let mut hasher = blake3::Hasher::new();
        for (name, kind) in self.column_kinds()? {
            hasher.update(name.as_bytes());
            hasher.update(format!("{kind:?}").as_bytes());
            hasher.update(&[0x1f]);
        }
        for row in self.rows()? {
            for cell in &row {
                hasher.update(format!("{cell:?}").as_bytes());
                hasher.update(&[0x1f]);
            }
            hasher.update(&[0x1e]);
        }
        Ok(hasher.finalize().to_hex().to_string())
    }

    /// Write the table as CSV with a header row. Nulls become empty fields.
    pub fn write_csv<W: io::Write>(&self, writer: W) -> Result<(), ExportError> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        csv_writer.write_record(self.column_names())?;
        for row in self.rows()? {
            csv_writer.write_record(row.iter().map(|cell| cell.to_string()))?;
        }
        csv_writer.flush()?;
        Ok(())
    }
}

fn kind_of(column: &str, dtype: &DataType) -> Result<ColumnKind, ValueConversionError> {
    match dtype {
        DataType::Boolean => Ok(ColumnKind::Boolean),
        DataType::String => Ok(ColumnKind::Text),
        DataType::Date => Ok(ColumnKind::Date),
        // An all-null column has no values to disagree with any affinity.
        DataType::Null => Ok(ColumnKind::Text),
        d if d.is_integer() => Ok(ColumnKind::Integer),
        d if d.is_float() => Ok(ColumnKind::Real),
        other => Err(ValueConversionError::new(
            column,
            format!("unsupported dtype {other}"),
        )),
    }
}

fn column_cells(column: &Column) -> Result<Vec<Cell>, ValueConversionError> {
    let name = column.name().to_string();
    let series = column.as_materialized_series();
    let polars_err = |e: PolarsError| ValueConversionError::new(&name, e.to_string());

    let cells = match series.dtype() {
        DataType::Null => vec![Cell::Null; series.len()],
        DataType::Boolean => series
            .bool()
            .map_err(polars_err)?
            .into_iter()
            .map(|v| v.map_or(Cell::Null, Cell::Boolean))
            .collect(),
        DataType::String => series
            .str()
            .map_err(polars_err)?
            .into_iter()
            .map(|v| v.map_or(Cell::Null, |s| Cell::Text(s.to_string())))
            .collect(),
        DataType::Date => {
            let physical = series.cast(&DataType::Int32).map_err(polars_err)?;
            let days = physical.i32().map_err(polars_err)?;
            let mut cells = Vec::with_capacity(days.len());
            for value in days.into_iter() {
                cells.push(match value {
                    None => Cell::Null,
                    Some(d) => Cell::Date(epoch_days_to_date(d).ok_or_else(|| {
                        ValueConversionError::new(&name, format!("date out of range: {d}"))
                    })?),
                });
            }
            cells
        }
        DataType::UInt64 => {
            let values = series.u64().map_err(polars_err)?;
            let mut cells = Vec::with_capacity(values.len());
            for value in values.into_iter() {
                cells.push(match value {
                    None => Cell::Null,
                    Some(v) => Cell::Integer(i64::try_from(v).map_err(|_| {
                        ValueConversionError::new(&name, format!("{v} exceeds the integer range"))
                    })?),
                });
            }
            cells
        }
        d if d.is_integer() => {
            let widened = series.cast(&DataType::Int64).map_err(polars_err)?;
            widened
                .i64()
                .map_err(polars_err)?
                .into_iter()
                .map(|v| v.map_or(Cell::Null, Cell::Integer))
                .collect()
        }
        d if d.is_float() => {
            let widened = series.cast(&DataType::Float64).map_err(polars_err)?;
            widened
                .f64()
                .map_err(polars_err)?
                .into_iter()
                .map(|v| v.map_or(Cell::Null, Cell::Real))
                .collect()
        }
        other => {
            return Err(ValueConversionError::new(
                &name,
                format!("unsupported dtype {other}"),
            ))
        }
    };

    Ok(cells)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> CanonicalTable {
        let dates = Column::new("date".into(), &[date_to_epoch_days(
            NaiveDate::from_ymd_opt(2025, 1, 24).unwrap(),
        )])
        .cast(&DataType::Date)
        .unwrap();
        let df = DataFrame::new(vec![
            dates,
            Column::new("symbol".into(), &["AAPL"]),
            Column::new("Closing Price".into(), &[181.0]),
            Column::new("Trading Volume".into(), &[1_000_000i64]),
        ])
        .unwrap();
        CanonicalTable::from_frame(df)
    }

    #[test]
    fn epoch_days_round_trip_known_date() {
        let date = NaiveDate::from_ymd_opt(1970, 1, 2).unwrap();
        assert_eq!(date_to_epoch_days(date), 1);
        assert_eq!(epoch_days_to_date(1), Some(date));
    }

    #[test]
    fn rows_are_typed_cells() {
        let rows = sample_table().rows().unwrap();
        assert_eq!(
            rows,
            vec![vec![
                Cell::Date(NaiveDate::from_ymd_opt(2025, 1, 24).unwrap()),
                Cell::Text("AAPL".into()),
                Cell::Real(181.0),
                Cell::Integer(1_000_000),
            ]]
        );
    }

    #[test]
    fn column_kinds_follow_dtypes() {
        let kinds = sample_table().column_kinds().unwrap();
        let kinds: Vec<ColumnKind> = kinds.into_iter().map(|(_, k)| k).collect();
        assert_eq!(
            kinds,
            vec![
                ColumnKind::Date,
                ColumnKind::Text,
                ColumnKind::Real,
                ColumnKind::Integer
            ]
        );
    }

    #[test]
    fn oversized_unsigned_value_is_rejected() {
        let df = DataFrame::new(vec![Column::new("volume".into(), &[u64::MAX])]).unwrap();
        let err = CanonicalTable::from_frame(df).rows().unwrap_err();
        assert_eq!(err.column, "volume");
    }

    #[test]
    fn fingerprint_is_stable_and_content_sensitive() {
        let a = sample_table();
        let b = sample_table();
        assert_eq!(a.fingerprint().unwrap(), b.fingerprint().unwrap());

        let other = DataFrame::new(vec![Column::new("symbol".into(), &["MSFT"])]).unwrap();
        let other = CanonicalTable::from_frame(other);
        assert_ne!(a.fingerprint().unwrap(), other.fingerprint().unwrap());
    }

    #[test]
    fn csv_export_writes_header_and_rows() {
        let mut out = Vec::new();
        sample_table().write_csv(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "date,symbol,Closing Price,Trading Volume\n2025-01-24,AAPL,181.0,1000000\n"
        );
    }
}
