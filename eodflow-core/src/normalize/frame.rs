//! Record sequence → Polars frame.
//!
//! Columns are the union of record keys minus the denylist, ordered so the
//! canonical columns come first. A key missing from a record is a null in that
//! row. Each column's dtype is inferred from its non-null values. A key that
//! already carries a canonical label is discarded when the provider column
//! renamed to that label is also present; the provider column wins.

use super::schema::{canonical_name, column_rank, is_dropped, DATE_COLUMN, RENAMED_COLUMNS};
use polars::prelude::*;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use tracing::warn;

/// Inferred storage type of a JSON column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Inferred {
    Int,
    Float,
    Bool,
    Str,
    /// Mixed scalars or nested values: rendered as text.
    Mixed,
}

impl Inferred {
    fn of(value: &Value) -> Self {
        match value {
            Value::Number(n) if n.is_i64() => Inferred::Int,
            Value::Number(_) => Inferred::Float,
            Value::Bool(_) => Inferred::Bool,
            Value::String(_) => Inferred::Str,
            _ => Inferred::Mixed,
        }
    }

    fn merge(self, other: Self) -> Self {
        match (self, other) {
            (a, b) if a == b => a,
            (Inferred::Int, Inferred::Float) | (Inferred::Float, Inferred::Int) => Inferred::Float,
            _ => Inferred::Mixed,
        }
    }
}

/// Provider column names to keep, in canonical output order.
pub(super) fn kept_columns(records: &[&Map<String, Value>]) -> Vec<String> {
    let mut names: BTreeSet<&str> = BTreeSet::new();
    names.insert(DATE_COLUMN);
    for record in records {
        for key in record.keys() {
            if !is_dropped(key) {
                names.insert(key.as_str());
            }
        }
    }

    for (from, to) in RENAMED_COLUMNS {
        if names.contains(from) && names.remove(to) {
            warn!(
                column = to,
                source = from,
                "discarding pass-through column that collides with a renamed column"
            );
        }
    }

    let mut names: Vec<String> = names.into_iter().map(String::from).collect();
    names.sort_by(|a, b| column_rank(canonical_name(a)).cmp(&column_rank(canonical_name(b))));
    names
}

/// Build a frame with one row per record and one column per kept name.
pub(super) fn build_frame(
    records: &[&Map<String, Value>],
    columns: &[String],
) -> PolarsResult<DataFrame> {
    let built = columns
        .iter()
        .map(|name| {
            let values: Vec<Option<&Value>> = records
                .iter()
                .map(|record| record.get(name).filter(|v| !v.is_null()))
                .collect();
            build_column(name, &values)
        })
        .collect::<Vec<_>>();
    DataFrame::new(built)
}

fn build_column(name: &str, values: &[Option<&Value>]) -> Column {
    let inferred = values
        .iter()
        .flatten()
        .map(|v| Inferred::of(v))
        .reduce(Inferred::merge)
        .unwrap_or(Inferred::Str);

    let name: PlSmallStr = name.into();
    match inferred {
        Inferred::Int => {
            let data: Vec<Option<i64>> = values.iter().map(|v| v.and_then(Value::as_i64)).collect();
            Column::new(name, data)
        }
        Inferred::Float => {
            let data: Vec<Option<f64>> = values.iter().map(|v| v.and_then(Value::as_f64)).collect();
            Column::new(name, data)
        }
        Inferred::Bool => {
            let data: Vec<Option<bool>> =
                values.iter().map(|v| v.and_then(Value::as_bool)).collect();
            Column::new(name, data)
        }
        Inferred::Str | Inferred::Mixed => {
            let data: Vec<Option<String>> = values
                .iter()
                .map(|v| {
                    v.map(|v| match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                })
                .collect();
            Column::new(name, data)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn objects(values: &[Value]) -> Vec<&Map<String, Value>> {
        values.iter().map(|v| v.as_object().unwrap()).collect()
    }

    #[test]
    fn infers_merge_rules() {
        assert_eq!(Inferred::Int.merge(Inferred::Float), Inferred::Float);
        assert_eq!(Inferred::Str.merge(Inferred::Str), Inferred::Str);
        assert_eq!(Inferred::Str.merge(Inferred::Int), Inferred::Mixed);
    }

    #[test]
    fn kept_columns_drop_denylist_and_order_canonically() {
        let raw = vec![json!({
            "symbol": "AAPL", "close": 1.0, "adj_close": 1.0,
            "open": 1.0, "exchange": "XNAS", "date": "2025-01-24", "extra": 1
        })];
        let records = objects(&raw);
        assert_eq!(
            kept_columns(&records),
            vec!["date", "symbol", "open", "close", "extra"]
        );
    }

    #[test]
    fn canonical_label_in_payload_yields_to_the_renamed_column() {
        let raw = vec![json!({
            "date": "2025-01-24", "close": 1.0, "Closing Price": null,
            "Opening Price": 2.0
        })];
        let records = objects(&raw);
        // No `open`, so the pass-through `Opening Price` survives.
        assert_eq!(
            kept_columns(&records),
            vec!["date", "Opening Price", "close"]
        );
    }

    #[test]
    fn kept_columns_always_include_date() {
        let raw = vec![json!({"symbol": "AAPL"})];
        let records = objects(&raw);
        assert_eq!(kept_columns(&records), vec!["date", "symbol"]);
    }

    #[test]
    fn column_dtypes_are_inferred() {
        let raw = vec![
            json!({"date": "2025-01-24", "open": 1, "volume": 10, "flag": true, "misc": "x"}),
            json!({"date": "2025-01-23", "open": 1.5, "volume": 20, "flag": false, "misc": 3}),
        ];
        let records = objects(&raw);
        let columns = kept_columns(&records);
        let df = build_frame(&records, &columns).unwrap();

        assert_eq!(df.column("open").unwrap().dtype(), &DataType::Float64);
        assert_eq!(df.column("volume").unwrap().dtype(), &DataType::Int64);
        assert_eq!(df.column("flag").unwrap().dtype(), &DataType::Boolean);
        assert_eq!(df.column("misc").unwrap().dtype(), &DataType::String);
    }

    #[test]
    fn missing_keys_become_nulls() {
        let raw = vec![
            json!({"date": "2025-01-24", "close": 1.0}),
            json!({"date": "2025-01-23"}),
        ];
        let records = objects(&raw);
        let columns = kept_columns(&records);
        let df = build_frame(&records, &columns).unwrap();
        assert_eq!(df.column("close").unwrap().null_count(), 1);
    }
}
