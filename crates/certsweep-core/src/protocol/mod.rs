//! JSON bodies of the Worker ↔ Manager HTTP API.
//!
//! Both binaries serialize exactly these types, so the wire contract
//! lives in one place. All indices are `i64`: the store keeps them in
//! 64-bit integer columns and CT tree sizes fit comfortably.

use serde::{Deserialize, Serialize};

#[cfg(test)]
mod tests;

/// Maximum number of certificate records per upload request.
pub const MAX_UPLOAD_BATCH: usize = 32;

/// `POST /api/worker/acquire` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquireRequest {
    /// Public worker identity.
    pub worker_name: String,
    /// Log category the calling thread serves.
    pub category: String,
}

/// A job range handed to a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignedRange {
    /// Catalog name of the log.
    pub log_name: String,
    /// Base HTTPS URL of the log.
    pub log_url: String,
    /// First index of the range (inclusive).
    pub start: i64,
    /// End of the range (exclusive).
    pub end: i64,
    /// Cursor to resume from; equals `start` on a fresh range.
    pub current: i64,
}

/// `POST /api/worker/acquire` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AcquireResponse {
    /// A range was assigned.
    Assigned(AssignedRange),
    /// Nothing available in the category right now.
    None {
        /// Always `true`.
        none: bool,
    },
}

impl AcquireResponse {
    /// The `{"none": true}` response.
    #[must_use]
    pub const fn none() -> Self {
        Self::None { none: true }
    }
}

/// `POST /api/worker/heartbeat` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    /// Public worker identity.
    pub worker_name: String,
    /// Catalog name of the log.
    pub log_name: String,
    /// Range start, identifying the assignment.
    pub start: i64,
    /// Highest fetched index plus one.
    pub current: i64,
    /// Highest index covered by a successful upload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_uploaded_index: Option<i64>,
    /// Suffix-matching certificates seen so far in this range.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_count: Option<u64>,
}

/// One certificate record in an upload batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadItem {
    /// Verbatim `get-entries` item as JSON.
    pub ct_entry: String,
    /// Base HTTPS URL of the source log.
    pub ct_log_url: String,
    /// Catalog name of the source log.
    pub log_name: String,
    /// Uploading worker.
    pub worker_name: String,
    /// Index of the entry within the log.
    pub ct_index: i64,
    /// Worker's public address, when it chose to report one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

/// `POST /api/worker/upload` response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    /// Records newly persisted.
    pub inserted: u64,
    /// Records suppressed as duplicates.
    pub duplicates: u64,
    /// Records that could not be processed.
    pub failures: u64,
}

/// `POST /api/worker/complete` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteRequest {
    /// Public worker identity.
    pub worker_name: String,
    /// Catalog name of the log.
    pub log_name: String,
    /// Range start, identifying the assignment.
    pub start: i64,
}

/// `POST /api/worker/resume` request, sent on worker-initiated
/// shutdown so the range returns to the pool with its cursor intact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeRequest {
    /// Public worker identity.
    pub worker_name: String,
    /// Catalog name of the log.
    pub log_name: String,
    /// Range start, identifying the assignment.
    pub start: i64,
    /// Live cursor at shutdown.
    pub current: i64,
}

/// `POST /api/worker/error` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    /// Public worker identity.
    pub worker_name: String,
    /// Catalog name of the log.
    pub log_name: String,
    /// Range start, identifying the assignment.
    pub start: i64,
    /// Operator-facing description of the failure.
    pub message: String,
}

/// Structured acknowledgement; the Manager never surfaces business
/// failures as HTTP errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    /// Whether the request was applied.
    pub ok: bool,
}

impl Ack {
    /// Applied.
    #[must_use]
    pub const fn ok() -> Self {
        Self { ok: true }
    }

    /// Ignored (unknown assignment, stale caller, precondition unmet).
    #[must_use]
    pub const fn rejected() -> Self {
        Self { ok: false }
    }
}

/// Duplicate-suppression cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Fingerprints currently held.
    pub cache_size: u64,
    /// Capacity bound.
    pub max_size: u64,
    /// `check_and_add` calls answered HIT.
    pub hit_count: u64,
    /// `check_and_add` calls answered MISS.
    pub miss_count: u64,
    /// `hit_count + miss_count`.
    pub total_requests: u64,
    /// `hit_count / total_requests`, zero when idle.
    pub hit_rate: f64,
}

/// `GET /api/cache/stats` response.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CacheStatsResponse {
    /// Counter snapshot.
    pub cache_stats: CacheStats,
}

/// `GET /api/worker/categories` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoriesResponse {
    /// Distinct categories of active catalog logs.
    pub categories: Vec<String>,
}

/// `POST /api/admin/tree_size` request (operator action).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeSizeUpdate {
    /// Catalog name of the log.
    pub log_name: String,
    /// New tree size; must not shrink.
    pub tree_size: i64,
}
