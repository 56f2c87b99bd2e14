//! Marketstack end-of-day source.
//!
//! One GET against the `eod` endpoint with `access_key` and `symbols` as query
//! parameters. Non-2xx statuses, transport failures and non-JSON bodies all
//! become a [`FetchError`]; nothing is retried here.

use super::provider::{EodSource, FetchError, RawPayload, SymbolSet};
use reqwest::blocking::Client;
use std::time::Duration;
use tracing::{info, warn};

/// Default Marketstack end-of-day endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://api.marketstack.com/v1/eod";

/// Longest body excerpt written to the log on failure.
const LOGGED_BODY_CHARS: usize = 512;

/// Marketstack end-of-day data source.
pub struct MarketstackSource {
    client: Client,
    endpoint: String,
    access_key: Option<String>,
}

impl MarketstackSource {
    /// Build a source. `timeout` of `None` leaves requests unbounded.
    ///
    /// A missing `access_key` is accepted here and reported on the first fetch.
    pub fn new(
        endpoint: impl Into<String>,
        access_key: Option<String>,
        timeout: Option<Duration>,
    ) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Transport {
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            access_key,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl EodSource for MarketstackSource {
    fn name(&self) -> &str {
        "marketstack"
    }

    fn fetch(&self, symbols: &SymbolSet) -> Result<RawPayload, FetchError> {
        fetch_eod(
            &self.client,
            &self.endpoint,
            self.access_key.as_deref(),
            symbols,
        )
    }
}

/// Issue a single end-of-day request.
pub fn fetch_eod(
    client: &Client,
    endpoint: &str,
    access_key: Option<&str>,
    symbols: &SymbolSet,
) -> Result<RawPayload, FetchError> {
    let access_key = access_key
        .filter(|k| !k.trim().is_empty())
        .ok_or(FetchError::MissingCredential)?;
    let selector = symbols.selector();

    info!(endpoint, symbols = %selector, "fetching end-of-day records");

    // Errors are stripped of their URL: the query string carries the access key.
    let response = client
        .get(endpoint)
        .query(&[("access_key", access_key), ("symbols", selector.as_str())])
        .send()
        .map_err(|e| FetchError::Transport {
            reason: e.without_url().to_string(),
        })?;

    let status = response.status();
    let body = response.text().map_err(|e| FetchError::Transport {
        reason: format!("failed to read response body: {}", e.without_url()),
    })?;

    if !status.is_success() {
        warn!(
            status = status.as_u16(),
            body = truncate(&body, LOGGED_BODY_CHARS),
            "provider rejected request"
        );
        return Err(FetchError::Status {
            status: status.as_u16(),
            body,
        });
    }

    match RawPayload::from_json_str(&body) {
        Ok(payload) => {
            info!(status = status.as_u16(), bytes = body.len(), "fetched payload");
            Ok(payload)
        }
        Err(e) => {
            warn!(
                status = status.as_u16(),
                body = truncate(&body, LOGGED_BODY_CHARS),
                "response is not valid JSON"
            );
            Err(FetchError::Decode {
                status: status.as_u16(),
                body,
                reason: e.to_string(),
            })
        }
    }
}

/// Prefix of `text` holding at most `max_chars` characters.
fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_credential_fails_without_a_request() {
        // Unroutable endpoint: reaching the network would surface as Transport.
        let source = MarketstackSource::new("http://0.0.0.0:9/eod", None, None).unwrap();
        let err = source.fetch(&SymbolSet::parse("AAPL")).unwrap_err();
        assert_eq!(err, FetchError::MissingCredential);
    }

    #[test]
    fn blank_credential_counts_as_missing() {
        let source =
            MarketstackSource::new("http://0.0.0.0:9/eod", Some("  ".into()), None).unwrap();
        let err = source.fetch(&SymbolSet::parse("AAPL")).unwrap_err();
        assert_eq!(err.code(), "MissingCredential");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("short", 50), "short");
    }
}
