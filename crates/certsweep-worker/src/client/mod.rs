//! HTTP clients.
//!
//! Each worker thread owns its clients; nothing here is shared across
//! threads, so shutdown is a plain drop at thread exit.

mod ctlog;

pub use ctlog::{CtLogClient, FetchError};

use std::time::Duration;

use certsweep_core::protocol::{
    Ack, AcquireRequest, AcquireResponse, AssignedRange, CategoriesResponse, CompleteRequest,
    ErrorReport, HeartbeatRequest, ResumeRequest, UploadItem, UploadResponse,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Timeout for small control calls (acquire, heartbeat, complete).
const CONTROL_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for certificate uploads.
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(15);

/// Deadline for the best-effort `resume` on shutdown.
const RESUME_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors talking to the Manager.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ClientError {
    /// Connection, DNS, or timeout failure.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The Manager answered outside 2xx.
    #[error("manager returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },
}

/// Blocking client for the Manager control API.
pub struct ManagerClient {
    base: String,
    worker_name: String,
    http: reqwest::blocking::Client,
}

impl ManagerClient {
    /// Builds a client against `base` (no trailing slash) for
    /// `worker_name`.
    ///
    /// # Errors
    ///
    /// Returns an error when the underlying client cannot be built.
    pub fn new(base: &str, worker_name: &str) -> Result<Self, ClientError> {
        let http = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(CONTROL_TIMEOUT)
            .build()?;
        Ok(Self {
            base: base.trim_end_matches('/').to_string(),
            worker_name: worker_name.to_string(),
            http,
        })
    }

    /// The identity this client reports.
    #[must_use]
    pub fn worker_name(&self) -> &str {
        &self.worker_name
    }

    fn post<B: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        timeout: Duration,
    ) -> Result<R, ClientError> {
        let response = self
            .http
            .post(format!("{}{path}", self.base))
            .timeout(timeout)
            .json(body)
            .send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ClientError::Status {
                status: status.as_u16(),
                body: truncate(&body),
            });
        }
        Ok(response.json()?)
    }

    /// `GET /api/worker/categories`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport failure or a non-2xx
    /// answer.
    pub fn categories(&self) -> Result<Vec<String>, ClientError> {
        let response = self
            .http
            .get(format!("{}/api/worker/categories", self.base))
            .timeout(CONTROL_TIMEOUT)
            .send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ClientError::Status {
                status: status.as_u16(),
                body: truncate(&body),
            });
        }
        let parsed: CategoriesResponse = response.json()?;
        Ok(parsed.categories)
    }

    /// `POST /api/worker/acquire`; `Ok(None)` when the category is
    /// saturated.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport failure or a non-2xx
    /// answer.
    pub fn acquire(&self, category: &str) -> Result<Option<AssignedRange>, ClientError> {
        let response: AcquireResponse = self.post(
            "/api/worker/acquire",
            &AcquireRequest {
                worker_name: self.worker_name.clone(),
                category: category.to_string(),
            },
            CONTROL_TIMEOUT,
        )?;
        Ok(match response {
            AcquireResponse::Assigned(range) => Some(range),
            AcquireResponse::None { .. } => None,
        })
    }

    /// `POST /api/worker/heartbeat`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport failure or a non-2xx
    /// answer.
    pub fn heartbeat(&self, request: &HeartbeatRequest) -> Result<Ack, ClientError> {
        self.post("/api/worker/heartbeat", request, CONTROL_TIMEOUT)
    }

    /// `POST /api/worker/upload`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport failure or a non-2xx
    /// answer (including 413 for oversized batches).
    pub fn upload(&self, items: &[UploadItem]) -> Result<UploadResponse, ClientError> {
        self.post("/api/worker/upload", &items, UPLOAD_TIMEOUT)
    }

    /// `POST /api/worker/complete`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport failure or a non-2xx
    /// answer.
    pub fn complete(&self, log_name: &str, start: i64) -> Result<Ack, ClientError> {
        self.post(
            "/api/worker/complete",
            &CompleteRequest {
                worker_name: self.worker_name.clone(),
                log_name: log_name.to_string(),
                start,
            },
            CONTROL_TIMEOUT,
        )
    }

    /// `POST /api/worker/resume` under the shutdown deadline.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport failure or a non-2xx
    /// answer.
    pub fn resume(&self, log_name: &str, start: i64, current: i64) -> Result<Ack, ClientError> {
        self.post(
            "/api/worker/resume",
            &ResumeRequest {
                worker_name: self.worker_name.clone(),
                log_name: log_name.to_string(),
                start,
                current,
            },
            RESUME_TIMEOUT,
        )
    }

    /// `POST /api/worker/error`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport failure or a non-2xx
    /// answer.
    pub fn report_error(
        &self,
        log_name: &str,
        start: i64,
        message: &str,
    ) -> Result<Ack, ClientError> {
        self.post(
            "/api/worker/error",
            &ErrorReport {
                worker_name: self.worker_name.clone(),
                log_name: log_name.to_string(),
                start,
                message: message.to_string(),
            },
            CONTROL_TIMEOUT,
        )
    }
}

/// Bounds error bodies kept for logs.
fn truncate(body: &str) -> String {
    const LIMIT: usize = 512;
    if body.len() <= LIMIT {
        body.to_string()
    } else {
        let mut end = LIMIT;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &body[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_keeps_short_bodies() {
        assert_eq!(truncate("short"), "short");
    }

    #[test]
    fn test_truncate_bounds_long_bodies() {
        let long = "x".repeat(2_000);
        let cut = truncate(&long);
        assert!(cut.len() < 600);
        assert!(cut.ends_with('…'));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let long = "あ".repeat(400);
        let cut = truncate(&long);
        assert!(cut.ends_with('…'));
    }
}
