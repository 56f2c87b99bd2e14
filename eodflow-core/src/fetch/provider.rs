//! Source trait, raw payload and structured fetch errors.
//!
//! The `EodSource` trait abstracts over where end-of-day payloads come from so
//! the pipeline can be driven by a fake in tests.

use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Deserialized provider response. Opaque until the normalizer inspects it.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPayload(Value);

impl RawPayload {
    pub fn from_value(value: Value) -> Self {
        Self(value)
    }

    /// Parse a response body. Anything that is valid JSON is accepted.
    pub fn from_json_str(body: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(body).map(Self)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

/// Ticker selector sent as the `symbols` query parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolSet(Vec<String>);

impl SymbolSet {
    /// Build from individual tickers; blanks are skipped, whitespace trimmed.
    pub fn new<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            symbols
                .into_iter()
                .map(|s| s.as_ref().trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        )
    }

    /// Parse a comma-separated selector such as `"AAPL,MSFT"`.
    pub fn parse(selector: &str) -> Self {
        Self::new(selector.split(','))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn symbols(&self) -> &[String] {
        &self.0
    }

    /// Comma-joined form used on the wire.
    pub fn selector(&self) -> String {
        self.0.join(",")
    }
}

impl fmt::Display for SymbolSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.selector())
    }
}

/// Why a fetch produced no payload.
///
/// When a response was received, the status code and raw body are kept for
/// diagnostics.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FetchError {
    #[error("access credential is not configured (set MARKETSTACK_ACCESS_KEY)")]
    MissingCredential,

    #[error("request failed before a response was received: {reason}")]
    Transport { reason: String },

    #[error("provider returned HTTP {status}")]
    Status { status: u16, body: String },

    #[error("response body (HTTP {status}) is not valid JSON: {reason}")]
    Decode {
        status: u16,
        body: String,
        reason: String,
    },
}

impl FetchError {
    /// Stable reason code for logs and reports.
    pub fn code(&self) -> &'static str {
        match self {
            FetchError::MissingCredential => "MissingCredential",
            FetchError::Transport { .. } => "TransportFailure",
            FetchError::Status { .. } => "HttpStatus",
            FetchError::Decode { .. } => "DecodeFailure",
        }
    }

    /// HTTP status, if a response was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Status { status, .. } | FetchError::Decode { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Raw response body, if a response was received.
    pub fn body(&self) -> Option<&str> {
        match self {
            FetchError::Status { body, .. } | FetchError::Decode { body, .. } => Some(body),
            _ => None,
        }
    }
}

/// A source of end-of-day payloads.
///
/// Implementations perform exactly one request per call and never retry;
/// retrying is left to whatever invokes the pipeline.
pub trait EodSource: Send + Sync {
    /// Human-readable name of this source.
    fn name(&self) -> &str;

    /// Fetch the latest end-of-day records for the given symbols.
    fn fetch(&self, symbols: &SymbolSet) -> Result<RawPayload, FetchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_set_trims_and_joins() {
        let set = SymbolSet::parse(" AAPL, ,MSFT ");
        assert_eq!(set.symbols(), ["AAPL", "MSFT"]);
        assert_eq!(set.selector(), "AAPL,MSFT");
        assert!(SymbolSet::parse(" , ").is_empty());
    }

    #[test]
    fn status_and_body_only_when_a_response_arrived() {
        let err = FetchError::Status {
            status: 404,
            body: "not found".into(),
        };
        assert_eq!(err.status(), Some(404));
        assert_eq!(err.body(), Some("not found"));

        let err = FetchError::Transport {
            reason: "connection reset".into(),
        };
        assert_eq!(err.status(), None);
        assert_eq!(err.body(), None);
    }

    #[test]
    fn any_json_is_a_payload() {
        assert!(RawPayload::from_json_str("[]").is_ok());
        assert!(RawPayload::from_json_str("{\"data\": []}").is_ok());
        assert!(RawPayload::from_json_str("<html>").is_err());
    }
}
