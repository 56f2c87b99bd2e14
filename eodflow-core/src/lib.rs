//! EODFlow Core: a small end-of-day price ingestion pipeline.
//!
//! - Fetch: one Marketstack `eod` request for a symbol set, returned as a raw payload
//! - Normalize: validate the payload, drop noise columns, null rows and unparseable
//!   dates, then rename price columns into a canonical table
//! - Load: replace a destination relation with that table in one transaction
//! - Pipeline: the three stages composed, plus hand-off helpers for external
//!   orchestrators
//! - Schedule: a sequential fixed-interval loop that never overlaps its own runs

pub mod config;
pub mod fetch;
pub mod normalize;
pub mod pipeline;
pub mod schedule;
pub mod store;
pub mod table;

pub use config::PipelineConfig;
pub use fetch::{EodSource, FetchError, RawPayload, SymbolSet};
pub use normalize::{NormalizeError, NormalizeStats, Normalizer};
pub use pipeline::{Pipeline, PipelineError, RunReport};
pub use store::{load, LoadError, LoadReport, ReplaceWriter};
pub use table::CanonicalTable;
