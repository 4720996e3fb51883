//! Wire-shape tests for the protocol DTOs.

use serde_json::json;

use super::*;

#[test]
fn test_acquire_none_serializes_as_flag_object() {
    let body = serde_json::to_value(AcquireResponse::none()).unwrap();
    assert_eq!(body, json!({"none": true}));
}

#[test]
fn test_acquire_response_round_trips_both_variants() {
    let assigned = AcquireResponse::Assigned(AssignedRange {
        log_name: "argon2026".to_string(),
        log_url: "https://ct.example.com/argon2026/".to_string(),
        start: 16384,
        end: 32768,
        current: 20000,
    });
    let back: AcquireResponse =
        serde_json::from_str(&serde_json::to_string(&assigned).unwrap()).unwrap();
    assert_eq!(back, assigned);

    let none: AcquireResponse = serde_json::from_value(json!({"none": true})).unwrap();
    assert_eq!(none, AcquireResponse::none());
}

#[test]
fn test_heartbeat_optional_fields_are_omitted() {
    let hb = HeartbeatRequest {
        worker_name: "pin-kero-0042".to_string(),
        log_name: "argon2026".to_string(),
        start: 0,
        current: 100,
        last_uploaded_index: None,
        matched_count: None,
    };
    let body = serde_json::to_string(&hb).unwrap();
    assert!(!body.contains("last_uploaded_index"));
    assert!(!body.contains("matched_count"));

    // And a bare body without them still parses.
    let parsed: HeartbeatRequest = serde_json::from_value(json!({
        "worker_name": "pin-kero-0042",
        "log_name": "argon2026",
        "start": 0,
        "current": 100
    }))
    .unwrap();
    assert_eq!(parsed.current, 100);
    assert!(parsed.last_uploaded_index.is_none());
}

#[test]
fn test_upload_item_round_trip() {
    let item = UploadItem {
        ct_entry: r#"{"leaf_input":"AAEC"}"#.to_string(),
        ct_log_url: "https://ct.example.com/argon2026/".to_string(),
        log_name: "argon2026".to_string(),
        worker_name: "pin-kero-0042".to_string(),
        ct_index: 12345,
        ip_address: None,
    };
    let json = serde_json::to_string(&item).unwrap();
    assert!(!json.contains("ip_address"));
    let back: UploadItem = serde_json::from_str(&json).unwrap();
    assert_eq!(back, item);
}

#[test]
fn test_upload_response_counts() {
    let resp: UploadResponse =
        serde_json::from_value(json!({"inserted": 5, "duplicates": 2, "failures": 0})).unwrap();
    assert_eq!(resp.inserted, 5);
    assert_eq!(resp.duplicates, 2);
    assert_eq!(resp.failures, 0);
}

#[test]
fn test_ack_shapes() {
    assert_eq!(serde_json::to_value(Ack::ok()).unwrap(), json!({"ok": true}));
    assert_eq!(
        serde_json::to_value(Ack::rejected()).unwrap(),
        json!({"ok": false})
    );
}

#[test]
fn test_cache_stats_response_is_nested() {
    let resp = CacheStatsResponse {
        cache_stats: CacheStats {
            cache_size: 10,
            max_size: 50_000,
            hit_count: 7,
            miss_count: 3,
            total_requests: 10,
            hit_rate: 0.7,
        },
    };
    let body = serde_json::to_value(resp).unwrap();
    assert_eq!(body["cache_stats"]["max_size"], 50_000);
    assert_eq!(body["cache_stats"]["hit_rate"], 0.7);
}
