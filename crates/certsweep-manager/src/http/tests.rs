//! Handler-level tests for the control surface.

use certsweep_core::protocol::AssignedRange;

use super::*;
use crate::coordinator::CoordinatorConfig;
use crate::store::CtLogRow;

const FIXTURES: &str = include_str!("../../tests/fixtures/ct_entries.json");

fn state() -> Arc<AppState> {
    let store = Store::open_in_memory().unwrap();
    store
        .upsert_log(&CtLogRow {
            log_name: "argon".to_string(),
            log_url: "https://ct.example.com/argon/".to_string(),
            category: "google".to_string(),
            tree_size: 100,
            active: true,
        })
        .unwrap();
    let coordinator = Coordinator::new(
        store.clone(),
        CoordinatorConfig {
            chunk_width: 100,
            ..CoordinatorConfig::default()
        },
    );
    coordinator.ensure_ranges("argon").unwrap();
    Arc::new(AppState {
        store,
        coordinator,
        cache: DuplicateCache::new(50_000),
    })
}

fn upload_item(index: usize) -> UploadItem {
    let value: serde_json::Value = serde_json::from_str(FIXTURES).unwrap();
    let leaf = value["batch"][index]["leaf_input"].as_str().unwrap();
    UploadItem {
        ct_entry: serde_json::json!({"leaf_input": leaf}).to_string(),
        ct_log_url: "https://ct.example.com/argon/".to_string(),
        log_name: "argon".to_string(),
        worker_name: "w1".to_string(),
        ct_index: i64::try_from(index).unwrap(),
        ip_address: None,
    }
}

#[tokio::test]
async fn test_acquire_hands_out_a_range_then_none() {
    let state = state();
    let request = AcquireRequest {
        worker_name: "w1".to_string(),
        category: "google".to_string(),
    };

    let Json(first) = acquire(State(Arc::clone(&state)), Json(request.clone()))
        .await
        .unwrap();
    assert_eq!(
        first,
        AcquireResponse::Assigned(AssignedRange {
            log_name: "argon".to_string(),
            log_url: "https://ct.example.com/argon/".to_string(),
            start: 0,
            end: 100,
            current: 0,
        })
    );

    // The category's only log is now held by this worker.
    let Json(second) = acquire(State(state), Json(request)).await.unwrap();
    assert_eq!(second, AcquireResponse::none());
}

#[tokio::test]
async fn test_acquire_unknown_category_is_none_not_an_error() {
    let state = state();
    let Json(response) = acquire(
        State(state),
        Json(AcquireRequest {
            worker_name: "w1".to_string(),
            category: "letsencrypt".to_string(),
        }),
    )
    .await
    .unwrap();
    assert_eq!(response, AcquireResponse::none());
}

#[tokio::test]
async fn test_upload_rejects_oversized_batches() {
    let state = state();
    let items: Vec<UploadItem> = (0..33).map(|_| upload_item(0)).collect();
    let err = upload(State(state), Json(items)).await.unwrap_err();
    assert!(matches!(err, ApiError::BatchTooLarge(33)));
}

#[tokio::test]
async fn test_upload_empty_batch_returns_zeroes() {
    let state = state();
    let Json(response) = upload(State(state), Json(Vec::new())).await.unwrap();
    assert_eq!(response, UploadResponse::default());
}

#[tokio::test]
async fn test_upload_then_replay_is_idempotent() {
    let state = state();
    let items: Vec<UploadItem> = (0..5).map(upload_item).collect();

    let Json(first) = upload(State(Arc::clone(&state)), Json(items.clone()))
        .await
        .unwrap();
    assert_eq!(first.inserted, 5);
    assert_eq!(first.duplicates, 0);

    let Json(second) = upload(State(Arc::clone(&state)), Json(items)).await.unwrap();
    assert_eq!(second.inserted, 0);
    assert_eq!(second.duplicates, 5);
    assert_eq!(state.store.cert_count().unwrap(), 5);
}

#[tokio::test]
async fn test_heartbeat_ack_reflects_ownership() {
    let state = state();
    acquire(
        State(Arc::clone(&state)),
        Json(AcquireRequest {
            worker_name: "w1".to_string(),
            category: "google".to_string(),
        }),
    )
    .await
    .unwrap();

    let owned = HeartbeatRequest {
        worker_name: "w1".to_string(),
        log_name: "argon".to_string(),
        start: 0,
        current: 10,
        last_uploaded_index: None,
        matched_count: None,
    };
    let Json(ack) = heartbeat(State(Arc::clone(&state)), Json(owned.clone()))
        .await
        .unwrap();
    assert!(ack.ok);

    let mut stolen = owned;
    stolen.worker_name = "w2".to_string();
    let Json(ack) = heartbeat(State(state), Json(stolen)).await.unwrap();
    assert!(!ack.ok);
}

#[tokio::test]
async fn test_categories_lists_active_categories() {
    let state = state();
    let Json(response) = categories(State(state)).await.unwrap();
    assert_eq!(response.categories, vec!["google".to_string()]);
}

#[tokio::test]
async fn test_cache_endpoints_report_and_clear() {
    let state = state();
    upload(
        State(Arc::clone(&state)),
        Json(vec![upload_item(0), upload_item(1)]),
    )
    .await
    .unwrap();

    let Json(stats) = cache_stats(State(Arc::clone(&state))).await;
    assert_eq!(stats.cache_stats.miss_count, 2);
    assert_eq!(
        stats.cache_stats.total_requests,
        stats.cache_stats.hit_count + stats.cache_stats.miss_count
    );

    let Json(ack) = cache_clear(State(Arc::clone(&state))).await;
    assert!(ack.ok);
    let Json(stats) = cache_stats(State(state)).await;
    assert_eq!(stats.cache_stats.cache_size, 0);
    assert_eq!(stats.cache_stats.total_requests, 0);
}

#[tokio::test]
async fn test_tree_size_growth_partitions_new_ranges() {
    let state = state();
    let Json(ack) = tree_size(
        State(Arc::clone(&state)),
        Json(TreeSizeUpdate {
            log_name: "argon".to_string(),
            tree_size: 250,
        }),
    )
    .await
    .unwrap();
    assert!(ack.ok);
    assert!(state.store.range("argon", 200).unwrap().is_some());

    // Shrinking is refused.
    let Json(ack) = tree_size(
        State(state),
        Json(TreeSizeUpdate {
            log_name: "argon".to_string(),
            tree_size: 10,
        }),
    )
    .await
    .unwrap();
    assert!(!ack.ok);
}

#[test]
fn test_router_builds() {
    let _router = router(state());
}
