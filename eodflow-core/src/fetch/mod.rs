//! Fetch stage: one request, one raw payload.

pub mod marketstack;
pub mod provider;

pub use marketstack::{fetch_eod, MarketstackSource, DEFAULT_ENDPOINT};
pub use provider::{EodSource, FetchError, RawPayload, SymbolSet};
