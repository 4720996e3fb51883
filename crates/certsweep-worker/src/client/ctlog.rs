//! CT log client.
//!
//! One client per configured proxy (or a single direct client),
//! rotated per request the way the original operators spread load
//! across egress addresses. Keep-alive pooling and HTTP/2 via ALPN
//! make the per-window `get-entries` calls cheap; the whole set is
//! dropped when the owning thread exits.

use std::time::Duration;

use certsweep_core::entry::RawEntry;
use rand::Rng;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// Request timeout for `get-entries`.
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Idle keep-alive connections retained per host.
const MAX_IDLE_PER_HOST: usize = 20;

/// Classified fetch failures; the fetch loop maps these onto retry,
/// abandon, or error-report behavior.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FetchError {
    /// HTTP 429; honor `Retry-After` when the log supplied one.
    #[error("rate limited{}", retry_after.map(|d| format!(", retry after {}s", d.as_secs())).unwrap_or_default())]
    RateLimited {
        /// Parsed `Retry-After` header.
        retry_after: Option<Duration>,
    },

    /// HTTP 5xx; transient on the log's side.
    #[error("log server error {status}")]
    Server {
        /// HTTP status code.
        status: u16,
    },

    /// Any other 4xx; the range cannot be fetched.
    #[error("log rejected request with {status}: {body}")]
    Permanent {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },

    /// Connection, DNS, or timeout failure.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The 200 response was not a valid entries document.
    #[error("malformed get-entries response: {0}")]
    Malformed(String),
}

#[derive(Debug, Deserialize)]
struct GetEntriesResponse {
    #[serde(default)]
    entries: Vec<RawEntry>,
}

/// Blocking CT v1 client.
pub struct CtLogClient {
    clients: Vec<reqwest::blocking::Client>,
}

impl CtLogClient {
    /// Builds the client set: one per proxy, or one direct client when
    /// no proxies are configured.
    ///
    /// # Errors
    ///
    /// Returns an error when a proxy URL is rejected or a client
    /// cannot be built.
    pub fn new(proxies: &[String]) -> Result<Self, FetchError> {
        let mut clients = Vec::new();
        if proxies.is_empty() {
            clients.push(Self::builder().build()?);
        } else {
            for proxy in proxies {
                let proxy = reqwest::Proxy::all(proxy.as_str())?;
                clients.push(Self::builder().proxy(proxy).build()?);
            }
        }
        Ok(Self { clients })
    }

    fn builder() -> reqwest::blocking::ClientBuilder {
        reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(FETCH_TIMEOUT)
            .pool_max_idle_per_host(MAX_IDLE_PER_HOST)
    }

    fn pick(&self) -> &reqwest::blocking::Client {
        if self.clients.len() == 1 {
            &self.clients[0]
        } else {
            &self.clients[rand::thread_rng().gen_range(0..self.clients.len())]
        }
    }

    /// Fetches entries `start ..= end` (CT's inclusive convention).
    /// The log may return fewer entries than requested; an empty list
    /// is a valid answer.
    ///
    /// # Errors
    ///
    /// Returns a classified [`FetchError`].
    pub fn get_entries(
        &self,
        log_url: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<RawEntry>, FetchError> {
        let url = format!(
            "{}/ct/v1/get-entries?start={start}&end={end}",
            log_url.trim_end_matches('/')
        );
        debug!(url = %url, "fetching entries");
        let response = self.pick().get(&url).send()?;
        let status = response.status();

        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(FetchError::RateLimited { retry_after });
        }
        if status.is_server_error() {
            return Err(FetchError::Server {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            let body: String = response
                .text()
                .unwrap_or_default()
                .chars()
                .take(512)
                .collect();
            return Err(FetchError::Permanent {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GetEntriesResponse = response
            .json()
            .map_err(|err| FetchError::Malformed(err.to_string()))?;
        Ok(parsed.entries)
    }
}
