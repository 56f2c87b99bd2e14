//! Destination connection strings.
//!
//! Accepted forms:
//! - `sqlite://relative/path.db`, `sqlite:///absolute/path.db`, `sqlite:path.db`
//! - `sqlite::memory:` / `sqlite://:memory:` / `:memory:`
//! - a bare filesystem path
//!
//! Any other `scheme://` is rejected.

use super::LoadError;
use std::fmt;
use std::path::PathBuf;

const MEMORY: &str = ":memory:";

/// Where the SQLite relation lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    File(PathBuf),
    /// Private in-memory database; contents vanish when the connection closes.
    Memory,
}

impl Destination {
    pub fn parse(url: &str) -> Result<Self, LoadError> {
        let url = url.trim();
        let rest = if let Some(rest) = url.strip_prefix("sqlite://") {
            rest
        } else if let Some(rest) = url.strip_prefix("sqlite:") {
            rest
        } else if let Some((scheme, _)) = url.split_once("://") {
            return Err(LoadError::UnsupportedDestination(format!(
                "scheme '{scheme}' is not supported, use sqlite://"
            )));
        } else {
            url
        };

        if rest == MEMORY {
            return Ok(Destination::Memory);
        }
        if rest.is_empty() {
            return Err(LoadError::UnsupportedDestination(
                "connection string has no database path".into(),
            ));
        }
        Ok(Destination::File(PathBuf::from(rest)))
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::File(path) => write!(f, "sqlite://{}", path.display()),
            Destination::Memory => f.write_str("sqlite::memory:"),
        }
    }
}
