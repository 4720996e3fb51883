//! The control HTTP surface.
//!
//! Thin axum handlers over the coordinator, cache, and ingestion
//! pipeline. Business outcomes travel as structured JSON with HTTP
//! 200; the only deliberate non-2xx statuses are 413 for an oversized
//! upload batch and 500 when the store itself fails.

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use certsweep_core::protocol::{
    Ack, AcquireRequest, AcquireResponse, CacheStatsResponse, CategoriesResponse, CompleteRequest,
    ErrorReport, HeartbeatRequest, MAX_UPLOAD_BATCH, ResumeRequest, TreeSizeUpdate, UploadItem,
    UploadResponse,
};
use tracing::{error, info};

use crate::cache::DuplicateCache;
use crate::coordinator::Coordinator;
use crate::ingest;
use crate::store::Store;

#[cfg(test)]
mod tests;

/// Shared state behind every handler.
pub struct AppState {
    /// Database handle.
    pub store: Store,
    /// Job coordinator.
    pub coordinator: Coordinator,
    /// Duplicate-suppression cache.
    pub cache: DuplicateCache,
}

/// Handler-level failures.
#[derive(Debug)]
enum ApiError {
    /// Upload batch above [`MAX_UPLOAD_BATCH`].
    BatchTooLarge(usize),
    /// Store or coordinator failure.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::BatchTooLarge(len) => (
                StatusCode::PAYLOAD_TOO_LARGE,
                Json(serde_json::json!({
                    "error": format!("batch of {len} exceeds the {MAX_UPLOAD_BATCH} record limit")
                })),
            )
                .into_response(),
            Self::Internal(detail) => {
                error!(detail = %detail, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({"error": "internal error"})),
                )
                    .into_response()
            }
        }
    }
}

impl<E: std::error::Error> From<E> for ApiError {
    fn from(err: E) -> Self {
        Self::Internal(err.to_string())
    }
}

/// Builds the Manager router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/worker/acquire", post(acquire))
        .route("/api/worker/heartbeat", post(heartbeat))
        .route("/api/worker/upload", post(upload))
        .route("/api/worker/complete", post(complete))
        .route("/api/worker/resume", post(resume))
        .route("/api/worker/error", post(report_error))
        .route("/api/worker/categories", get(categories))
        .route("/api/cache/stats", get(cache_stats))
        .route("/api/cache/clear", post(cache_clear))
        .route("/api/admin/tree_size", post(tree_size))
        .with_state(state)
}

async fn acquire(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AcquireRequest>,
) -> Result<Json<AcquireResponse>, ApiError> {
    let assigned = state
        .coordinator
        .acquire(&request.worker_name, &request.category)?;
    Ok(Json(assigned.map_or(AcquireResponse::none(), AcquireResponse::Assigned)))
}

async fn heartbeat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<HeartbeatRequest>,
) -> Result<Json<Ack>, ApiError> {
    let applied = state.coordinator.heartbeat(&request)?;
    Ok(Json(Ack { ok: applied }))
}

async fn upload(
    State(state): State<Arc<AppState>>,
    Json(items): Json<Vec<UploadItem>>,
) -> Result<Json<UploadResponse>, ApiError> {
    if items.len() > MAX_UPLOAD_BATCH {
        return Err(ApiError::BatchTooLarge(items.len()));
    }
    Ok(Json(ingest::ingest_batch(&state.store, &state.cache, &items)))
}

async fn complete(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CompleteRequest>,
) -> Result<Json<Ack>, ApiError> {
    let applied = state.coordinator.complete(&request)?;
    Ok(Json(Ack { ok: applied }))
}

async fn resume(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ResumeRequest>,
) -> Result<Json<Ack>, ApiError> {
    let applied = state.coordinator.resume(&request)?;
    Ok(Json(Ack { ok: applied }))
}

async fn report_error(
    State(state): State<Arc<AppState>>,
    Json(report): Json<ErrorReport>,
) -> Result<Json<Ack>, ApiError> {
    let applied = state.coordinator.report_failed(&report)?;
    Ok(Json(Ack { ok: applied }))
}

async fn categories(
    State(state): State<Arc<AppState>>,
) -> Result<Json<CategoriesResponse>, ApiError> {
    Ok(Json(CategoriesResponse {
        categories: state.store.categories()?,
    }))
}

async fn cache_stats(State(state): State<Arc<AppState>>) -> Json<CacheStatsResponse> {
    Json(CacheStatsResponse {
        cache_stats: state.cache.stats(),
    })
}

async fn cache_clear(State(state): State<Arc<AppState>>) -> Json<Ack> {
    state.cache.clear();
    info!("duplicate cache cleared by operator");
    Json(Ack::ok())
}

async fn tree_size(
    State(state): State<Arc<AppState>>,
    Json(update): Json<TreeSizeUpdate>,
) -> Result<Json<Ack>, ApiError> {
    let grown = state
        .store
        .grow_tree_size(&update.log_name, update.tree_size)?;
    if !grown {
        return Ok(Json(Ack::rejected()));
    }
    let created = state.coordinator.ensure_ranges(&update.log_name)?;
    info!(
        log_name = %update.log_name,
        tree_size = update.tree_size,
        created,
        "tree size grown"
    );
    Ok(Json(Ack::ok()))
}
