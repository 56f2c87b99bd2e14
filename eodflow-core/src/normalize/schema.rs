//! Column policy for end-of-day records: what is dropped, what is renamed, and
//! the order canonical columns appear in.

/// Field holding the record sequence in a provider payload.
pub const DATA_FIELD: &str = "data";

/// Field holding the trading date of a record.
pub const DATE_COLUMN: &str = "date";

/// Field holding the ticker of a record.
pub const SYMBOL_COLUMN: &str = "symbol";

/// Provider-specific columns removed before any row filtering.
pub const DROPPED_COLUMNS: [&str; 8] = [
    "exchange",
    "adj_close",
    "adj_high",
    "adj_low",
    "adj_open",
    "adj_volume",
    "split_factor",
    "dividend",
];

/// Provider price/volume names and their canonical labels.
pub const RENAMED_COLUMNS: [(&str, &str); 5] = [
    ("open", "Opening Price"),
    ("high", "Highest Price"),
    ("low", "Lowest Price"),
    ("close", "Closing Price"),
    ("volume", "Trading Volume"),
];

/// Canonical label for a provider column, or the name unchanged.
pub fn canonical_name(column: &str) -> &str {
    RENAMED_COLUMNS
        .iter()
        .find(|(from, _)| *from == column)
        .map(|(_, to)| *to)
        .unwrap_or(column)
}

pub fn is_dropped(column: &str) -> bool {
    DROPPED_COLUMNS.contains(&column)
}

/// Sort key placing `date`, `symbol`, then the renamed price/volume columns
/// first (in that order); everything else follows by name.
pub fn column_rank(canonical: &str) -> (usize, &str) {
    if canonical == DATE_COLUMN {
        return (0, canonical);
    }
    if canonical == SYMBOL_COLUMN {
        return (1, canonical);
    }
    match RENAMED_COLUMNS.iter().position(|(_, to)| *to == canonical) {
        Some(i) => (2 + i, canonical),
        None => (2 + RENAMED_COLUMNS.len(), canonical),
    }
}
