//! Pipeline configuration.
//!
//! Loaded once at startup and passed into each stage. Layers, lowest first:
//! built-in defaults, an optional TOML file, the process environment, then
//! whatever the caller overrides (CLI flags). The access key is never read from
//! or written to the TOML file.

use crate::fetch::{SymbolSet, DEFAULT_ENDPOINT};
use crate::store::DEFAULT_TABLE_NAME;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Access key variable.
pub const ENV_ACCESS_KEY: &str = "MARKETSTACK_ACCESS_KEY";
/// Destination connection string variable.
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
/// Comma-separated symbol selector variable.
pub const ENV_SYMBOLS: &str = "EODFLOW_SYMBOLS";
/// Endpoint override variable.
pub const ENV_ENDPOINT: &str = "EODFLOW_ENDPOINT";

/// Development-only destination used when nothing else is configured.
///
/// An unmanaged SQLite file in the working directory. Not for deployed use:
/// strict mode refuses it.
pub const PLACEHOLDER_DATABASE_URL: &str = "sqlite://eodflow-dev.db";

/// Longest accepted schedule interval: 366 days.
pub const MAX_INTERVAL_SECS: u64 = 366 * 24 * 60 * 60;

/// 2025-01-25T00:00:00Z
const DEFAULT_EPOCH_SECS: i64 = 1_737_763_200;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("no symbols configured")]
    NoSymbols,

    #[error("schedule interval must be greater than zero")]
    ZeroInterval,

    #[error("schedule interval of {0} s exceeds the maximum of 31622400 s")]
    IntervalTooLarge(u64),

    #[error("destination table name is empty")]
    EmptyTableName,

    #[error("no destination configured: set DATABASE_URL (the placeholder is refused in strict mode)")]
    PlaceholderDestination,
}

/// Secret credential. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessKey(String);

impl AccessKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessKey(<redacted>)")
    }
}

/// Where the destination connection string came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UrlOrigin {
    #[default]
    Placeholder,
    ConfigFile,
    Environment,
    Override,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SourceConfig {
    pub endpoint: String,
    pub symbols: Vec<String>,
    /// Request timeout; unset means the request is never cut short.
    pub timeout_secs: Option<u64>,
    #[serde(skip)]
    pub access_key: Option<AccessKey>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            symbols: vec!["AAPL".to_string()],
            timeout_secs: None,
            access_key: None,
        }
    }
}

impl SourceConfig {
    pub fn symbol_set(&self) -> SymbolSet {
        SymbolSet::new(&self.symbols)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DestinationConfig {
    pub url: Option<String>,
    pub table: String,
    /// Refuse the development placeholder destination.
    pub strict: bool,
    #[serde(skip)]
    pub origin: UrlOrigin,
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            url: None,
            table: DEFAULT_TABLE_NAME.to_string(),
            strict: false,
            origin: UrlOrigin::Placeholder,
        }
    }
}

impl DestinationConfig {
    /// Connection string to use, falling back to the placeholder.
    pub fn url(&self) -> &str {
        self.url.as_deref().unwrap_or(PLACEHOLDER_DATABASE_URL)
    }

    pub fn uses_placeholder(&self) -> bool {
        self.url.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScheduleConfig {
    /// First tick. Ticks before now are never replayed.
    pub start: DateTime<Utc>,
    pub interval_secs: u64,
    /// Run immediately when the scheduler starts after `start`.
    pub run_on_start: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            start: DateTime::from_timestamp(DEFAULT_EPOCH_SECS, 0).unwrap_or_default(),
            interval_secs: 60,
            run_on_start: true,
        }
    }
}

/// Complete pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct PipelineConfig {
    pub source: SourceConfig,
    pub destination: DestinationConfig,
    pub schedule: ScheduleConfig,
}

impl PipelineConfig {
    /// Parse a TOML document. Omitted sections keep their defaults.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let mut config: Self =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        if config.destination.url.is_some() {
            config.destination.origin = UrlOrigin::ConfigFile;
        }
        Ok(config)
    }

    /// Load a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml(&content)
    }

    /// Defaults (or `file`), then the process environment.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with(file, |key| std::env::var(key).ok())
    }

    /// Like [`load`](Self::load) with an injectable environment lookup.
    pub fn load_with<F>(file: Option<&Path>, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(env);
        Ok(config)
    }

    fn apply_env<F>(&mut self, env: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = non_empty(ENV_ACCESS_KEY) {
            self.source.access_key = Some(AccessKey::new(key.trim()));
        }
        if let Some(url) = non_empty(ENV_DATABASE_URL) {
            self.destination.url = Some(url);
            self.destination.origin = UrlOrigin::Environment;
        }
        if let Some(symbols) = non_empty(ENV_SYMBOLS) {
            self.source.symbols = SymbolSet::parse(&symbols).symbols().to_vec();
        }
        if let Some(endpoint) = non_empty(ENV_ENDPOINT) {
            self.source.endpoint = endpoint;
        }
    }

    /// Override the destination connection string (e.g. from a CLI flag).
    pub fn set_database_url(&mut self, url: impl Into<String>) {
        self.destination.url = Some(url.into());
        self.destination.origin = UrlOrigin::Override;
    }

    /// Check the configuration is usable. Logs a warning when the placeholder
    /// destination is in effect.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source.symbol_set().is_empty() {
            return Err(ConfigError::NoSymbols);
        }
        if self.schedule.interval_secs == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        if self.schedule.interval_secs > MAX_INTERVAL_SECS {
            return Err(ConfigError::IntervalTooLarge(self.schedule.interval_secs));
        }
        if self.destination.table.trim().is_empty() {
            return Err(ConfigError::EmptyTableName);
        }
        if self.destination.uses_placeholder() {
            if self.destination.strict {
                return Err(ConfigError::PlaceholderDestination);
            }
            warn!(
                url = PLACEHOLDER_DATABASE_URL,
                "DATABASE_URL is not set; using the development placeholder destination, unsafe for production"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_the_documented_surface() {
        let config = PipelineConfig::default();
        assert_eq!(config.source.endpoint, "https://api.marketstack.com/v1/eod");
        assert_eq!(config.source.symbols, vec!["AAPL"]);
        assert_eq!(config.destination.table, "new_table");
        assert_eq!(config.destination.url(), PLACEHOLDER_DATABASE_URL);
        assert_eq!(config.schedule.interval_secs, 60);
        assert_eq!(config.schedule.start.to_rfc3339(), "2025-01-25T00:00:00+00:00");
    }

    #[test]
    fn environment_overrides_file() {
        let config = PipelineConfig::from_toml(
            r#"
            [source]
            symbols = ["MSFT"]

            [destination]
            url = "sqlite://from-file.db"
            table = "prices"
            "#,
        )
        .unwrap();
        assert_eq!(config.destination.origin, UrlOrigin::ConfigFile);

        let mut config = config;
        config.apply_env(env_of(&[
            (ENV_DATABASE_URL, "sqlite://from-env.db"),
            (ENV_ACCESS_KEY, "secret"),
            (ENV_SYMBOLS, "AAPL, NVDA"),
        ]));

        assert_eq!(config.destination.url(), "sqlite://from-env.db");
        assert_eq!(config.destination.origin, UrlOrigin::Environment);
        assert_eq!(config.destination.table, "prices");
        assert_eq!(config.source.symbols, vec!["AAPL", "NVDA"]);
        assert_eq!(config.source.access_key, Some(AccessKey::new("secret")));
    }

    #[test]
    fn blank_environment_values_are_ignored() {
        let config =
            PipelineConfig::load_with(None, env_of(&[(ENV_ACCESS_KEY, "  "), (ENV_DATABASE_URL, "")]))
                .unwrap();
        assert!(config.source.access_key.is_none());
        assert!(config.destination.uses_placeholder());
    }

    #[test]
    fn access_key_is_never_printed() {
        let mut config = PipelineConfig::default();
        config.source.access_key = Some(AccessKey::new("hunter2"));
        assert!(!format!("{config:?}").contains("hunter2"));
        assert!(!toml::to_string(&config).unwrap().contains("hunter2"));
    }

    #[test]
    fn strict_mode_refuses_placeholder() {
        let mut config = PipelineConfig::default();
        assert!(config.validate().is_ok());

        config.destination.strict = true;
        assert_eq!(config.validate(), Err(ConfigError::PlaceholderDestination));

        config.set_database_url("sqlite://prod.db");
        assert!(config.validate().is_ok());
        assert_eq!(config.destination.origin, UrlOrigin::Override);
    }

    #[test]
    fn validation_rejects_unusable_values() {
        let mut config = PipelineConfig::default();
        config.source.symbols = vec![" ".into()];
        assert_eq!(config.validate(), Err(ConfigError::NoSymbols));

        let mut config = PipelineConfig::default();
        config.schedule.interval_secs = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroInterval));

        let mut config = PipelineConfig::default();
        config.schedule.interval_secs = u64::MAX;
        assert_eq!(config.validate(), Err(ConfigError::IntervalTooLarge(u64::MAX)));
        config.schedule.interval_secs = MAX_INTERVAL_SECS;
        assert!(config.validate().is_ok());

        let mut config = PipelineConfig::default();
        config.destination.table = String::new();
        assert_eq!(config.validate(), Err(ConfigError::EmptyTableName));
    }

    #[test]
    fn schedule_section_parses_rfc3339_start() {
        let config = PipelineConfig::from_toml(
            r#"
            [schedule]
            start = "2026-03-01T14:30:00Z"
            interval_secs = 300
            "#,
        )
        .unwrap();
        assert_eq!(config.schedule.interval_secs, 300);
        assert_eq!(config.schedule.start.to_rfc3339(), "2026-03-01T14:30:00+00:00");
        assert!(config.schedule.run_on_start);
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        assert!(matches!(
            PipelineConfig::from_toml("[source\nsymbols = 1"),
            Err(ConfigError::Parse(_))
        ));
    }
}
