//! Fetch → normalize → load, composed.
//!
//! `run_once` is plain function composition: each stage's output is the next
//! stage's input, and the first failure ends the run. Nothing is written unless
//! every stage before the loader succeeded.
//!
//! For an external orchestrator that ferries payloads between separately
//! invoked stages, [`normalize_handoff`] and [`load_handoff`] accept a possibly
//! absent upstream value and fail fast with an `Upstream` error when it is
//! missing.

use crate::config::{ConfigError, PipelineConfig};
use crate::fetch::{EodSource, FetchError, MarketstackSource, RawPayload, SymbolSet};
use crate::normalize::{NormalizeError, NormalizeStats, Normalizer};
use crate::store::{LoadError, LoadReport, ReplaceWriter, SqliteStore};
use crate::table::CanonicalTable;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info};

/// A run that stopped at some stage.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("fetch stage failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("normalize stage failed: {0}")]
    Normalize(#[from] NormalizeError),

    #[error("load stage failed: {0}")]
    Load(#[from] LoadError),
}

impl PipelineError {
    /// Stage the run stopped at.
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::Config(_) => "config",
            PipelineError::Fetch(_) => "fetch",
            PipelineError::Normalize(_) => "normalize",
            PipelineError::Load(_) => "load",
        }
    }

    /// Reason code of the underlying stage error.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::Config(_) => "ConfigError",
            PipelineError::Fetch(e) => e.code(),
            PipelineError::Normalize(e) => e.code(),
            PipelineError::Load(e) => e.code(),
        }
    }
}

/// Outcome of a fully successful run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub symbols: String,
    pub normalize: NormalizeStats,
    pub load: LoadReport,
    pub elapsed: Duration,
}

/// The three stages wired together for one symbol set and one destination table.
pub struct Pipeline {
    source: Box<dyn EodSource>,
    normalizer: Normalizer,
    writer: Box<dyn ReplaceWriter>,
    symbols: SymbolSet,
    table_name: String,
}

impl Pipeline {
    pub fn new(
        source: Box<dyn EodSource>,
        writer: Box<dyn ReplaceWriter>,
        symbols: SymbolSet,
        table_name: impl Into<String>,
    ) -> Self {
        Self {
            source,
            normalizer: Normalizer::new(),
            writer,
            symbols,
            table_name: table_name.into(),
        }
    }

    /// Marketstack source and SQLite destination from a validated config.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;

        let source = MarketstackSource::new(
            config.source.endpoint.clone(),
            config
                .source
                .access_key
                .as_ref()
                .map(|k| k.expose().to_string()),
            config.source.timeout(),
        )?;
        let writer = SqliteStore::open(config.destination.url())?;

        Ok(Self::new(
            Box::new(source),
            Box::new(writer),
            config.source.symbol_set(),
            config.destination.table.clone(),
        ))
    }

    pub fn symbols(&self) -> &SymbolSet {
        &self.symbols
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Fetch stage.
    pub fn fetch(&self) -> Result<RawPayload, FetchError> {
        self.source.fetch(&self.symbols)
    }

    /// Normalize stage.
    pub fn normalize(&self, payload: &RawPayload) -> Result<CanonicalTable, NormalizeError> {
        self.normalizer.normalize(payload)
    }

    /// Load stage. `table` must come from a successful normalize.
    pub fn load(&self, table: &CanonicalTable) -> Result<LoadReport, LoadError> {
        self.writer.replace(&self.table_name, table)
    }

    /// Fetch and normalize without touching the destination.
    pub fn run_until_normalized(&self) -> Result<CanonicalTable, PipelineError> {
        let payload = self.fetch()?;
        Ok(self.normalize(&payload)?)
    }

    /// One complete run. Failures are logged with their stage and reason code.
    pub fn run_once(&self) -> Result<RunReport, PipelineError> {
        self.run_once_with_table().map(|(report, _)| report)
    }

    /// [`run_once`](Self::run_once), also handing back the table that was loaded.
    pub fn run_once_with_table(&self) -> Result<(RunReport, CanonicalTable), PipelineError> {
        let started = Instant::now();
        info!(
            source = self.source.name(),
            symbols = %self.symbols,
            destination = %self.writer.describe(),
            table = %self.table_name,
            "run started"
        );

        let result = self
            .run_until_normalized()
            .and_then(|table| Ok((self.load(&table)?, table)));

        match result {
            Ok((load, table)) => {
                let report = RunReport {
                    symbols: self.symbols.selector(),
                    normalize: table.stats().clone(),
                    load,
                    elapsed: started.elapsed(),
                };
                info!(
                    rows = report.load.rows_written,
                    fingerprint = %report.load.fingerprint,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "run succeeded"
                );
                Ok((report, table))
            }
            Err(e) => {
                log_failure(&e);
                Err(e)
            }
        }
    }
}

fn log_failure(e: &PipelineError) {
    match e {
        PipelineError::Fetch(fetch) => error!(
            stage = e.stage(),
            code = e.code(),
            status = fetch.status(),
            error = %e,
            "run failed"
        ),
        _ => error!(stage = e.stage(), code = e.code(), error = %e, "run failed"),
    }
}

/// Normalize a payload delivered by an external channel that may carry nothing.
pub fn normalize_handoff(
    normalizer: &Normalizer,
    upstream: Option<&RawPayload>,
) -> Result<CanonicalTable, NormalizeError> {
    let payload = upstream
        .ok_or_else(|| NormalizeError::Upstream("fetch stage produced no payload".into()))?;
    normalizer.normalize(payload)
}

/// Load a table delivered by an external channel that may carry nothing.
pub fn load_handoff(
    writer: &dyn ReplaceWriter,
    table_name: &str,
    upstream: Option<&CanonicalTable>,
) -> Result<LoadReport, LoadError> {
    let table = upstream
        .ok_or_else(|| LoadError::Upstream("normalize stage produced no table".into()))?;
    writer.replace(table_name, table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Destination;

    #[test]
    fn handoffs_fail_fast_on_missing_upstream() {
        let err = normalize_handoff(&Normalizer::new(), None).unwrap_err();
        assert_eq!(err.code(), "UpstreamFailure");

        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::new(Destination::File(dir.path().join("eod.db")));
        let err = load_handoff(&store, "new_table", None).unwrap_err();
        assert_eq!(err.code(), "UpstreamFailure");
        // Nothing was created.
        assert!(store.read_table("new_table").unwrap().is_none());
    }

    #[test]
    fn error_codes_name_the_stage() {
        let e = PipelineError::from(FetchError::Status {
            status: 404,
            body: String::new(),
        });
        assert_eq!((e.stage(), e.code()), ("fetch", "HttpStatus"));

        let e = PipelineError::from(NormalizeError::EmptyResultSet);
        assert_eq!((e.stage(), e.code()), ("normalize", "EmptyResultSet"));
    }

    #[test]
    fn from_config_rejects_invalid_config() {
        let mut config = PipelineConfig::default();
        config.source.symbols.clear();
        assert!(matches!(
            Pipeline::from_config(&config),
            Err(PipelineError::Config(ConfigError::NoSymbols))
        ));
    }
}
