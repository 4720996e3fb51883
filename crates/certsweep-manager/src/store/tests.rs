//! Tests for the SQLite store.

use certsweep_core::cert::CertFingerprint;

use super::*;

fn store() -> Store {
    Store::open_in_memory().unwrap()
}

fn log(name: &str, category: &str, tree_size: i64) -> CtLogRow {
    CtLogRow {
        log_name: name.to_string(),
        log_url: format!("https://ct.example.com/{name}/"),
        category: category.to_string(),
        tree_size,
        active: true,
    }
}

fn range(log_name: &str, start: i64, end: i64) -> JobRangeRow {
    JobRangeRow {
        log_name: log_name.to_string(),
        start,
        end,
        current: start,
        last_uploaded_index: start - 1,
        state: JobState::Pending,
    }
}

fn fingerprint(serial: &str) -> CertFingerprint {
    CertFingerprint {
        issuer: "Example CA".to_string(),
        serial_number: serial.to_string(),
        not_before: 1_700_000_000,
        not_after: 1_800_000_000,
        common_name: "www.example.jp".to_string(),
    }
}

fn cert(serial: &str, ct_index: i64) -> NewCertificate {
    NewCertificate {
        ct_entry: r#"{"leaf_input":"AAEC"}"#.to_string(),
        log_url: "https://ct.example.com/argon/".to_string(),
        log_name: "argon".to_string(),
        worker_name: "pin-kero-0042".to_string(),
        ct_index,
        ip_address: None,
        fingerprint: fingerprint(serial),
    }
}

// ---- catalog ----------------------------------------------------------

#[test]
fn test_upsert_log_never_shrinks_tree_size() {
    let store = store();
    store.upsert_log(&log("argon", "google", 100)).unwrap();
    store.upsert_log(&log("argon", "google", 50)).unwrap();
    assert_eq!(store.log("argon").unwrap().unwrap().tree_size, 100);

    store.upsert_log(&log("argon", "google", 200)).unwrap();
    assert_eq!(store.log("argon").unwrap().unwrap().tree_size, 200);
}

#[test]
fn test_grow_tree_size_rejects_shrink_and_unknown_logs() {
    let store = store();
    store.upsert_log(&log("argon", "google", 100)).unwrap();
    assert!(store.grow_tree_size("argon", 150).unwrap());
    assert!(!store.grow_tree_size("argon", 150).unwrap());
    assert!(!store.grow_tree_size("argon", 90).unwrap());
    assert!(!store.grow_tree_size("missing", 10).unwrap());
}

#[test]
fn test_categories_are_distinct_and_active_only() {
    let store = store();
    store.upsert_log(&log("argon", "google", 10)).unwrap();
    store.upsert_log(&log("xenon", "google", 10)).unwrap();
    store.upsert_log(&log("nimbus", "cloudflare", 10)).unwrap();
    let mut inactive = log("dead", "digicert", 10);
    inactive.active = false;
    store.upsert_log(&inactive).unwrap();

    assert_eq!(
        store.categories().unwrap(),
        vec!["cloudflare".to_string(), "google".to_string()]
    );
}

#[test]
fn test_logs_in_category_skips_empty_trees() {
    let store = store();
    store.upsert_log(&log("argon", "google", 10)).unwrap();
    store.upsert_log(&log("seed", "google", 0)).unwrap();
    let names: Vec<String> = store
        .logs_in_category("google")
        .unwrap()
        .into_iter()
        .map(|l| l.log_name)
        .collect();
    assert_eq!(names, vec!["argon".to_string()]);
}

// ---- ranges and cursors ------------------------------------------------

#[test]
fn test_range_round_trip() {
    let store = store();
    store.insert_range(&range("argon", 0, 16384)).unwrap();
    let fetched = store.range("argon", 0).unwrap().unwrap();
    assert_eq!(fetched.end, 16384);
    assert_eq!(fetched.current, 0);
    assert_eq!(fetched.last_uploaded_index, -1);
    assert_eq!(fetched.state, JobState::Pending);
    assert!(store.range("argon", 999).unwrap().is_none());
}

#[test]
fn test_advance_cursor_is_forward_only_and_clamped() {
    let store = store();
    store.insert_range(&range("argon", 0, 100)).unwrap();

    store.advance_cursor("argon", 0, 40, Some(31)).unwrap();
    let r = store.range("argon", 0).unwrap().unwrap();
    assert_eq!(r.current, 40);
    assert_eq!(r.last_uploaded_index, 31);

    // Regression attempts are accepted but change nothing.
    store.advance_cursor("argon", 0, 10, Some(5)).unwrap();
    let r = store.range("argon", 0).unwrap().unwrap();
    assert_eq!(r.current, 40);
    assert_eq!(r.last_uploaded_index, 31);

    // Cursor clamps at end; the watermark clamps at the cursor.
    store.advance_cursor("argon", 0, 500, Some(400)).unwrap();
    let r = store.range("argon", 0).unwrap().unwrap();
    assert_eq!(r.current, 100);
    assert_eq!(r.last_uploaded_index, 100);
}

#[test]
fn test_pending_range_picks_smallest_start() {
    let store = store();
    store.insert_range(&range("argon", 16384, 32768)).unwrap();
    store.insert_range(&range("argon", 0, 16384)).unwrap();
    let mut taken = range("argon", 32768, 49152);
    taken.state = JobState::Running;
    store.insert_range(&taken).unwrap();

    assert_eq!(store.pending_range("argon").unwrap().unwrap().start, 0);
}

#[test]
fn test_stale_heartbeat_query_filters_by_state_and_cutoff() {
    let store = store();
    store.upsert_log(&log("argon", "google", 100)).unwrap();
    let mut running = range("argon", 0, 100);
    running.state = JobState::Running;
    store.insert_range(&running).unwrap();
    store
        .put_assignment(&AssignmentRow {
            log_name: "argon".to_string(),
            start: 0,
            worker_name: "w1".to_string(),
            assigned_at: 1_000,
            last_heartbeat_at: 1_000,
        })
        .unwrap();

    assert!(store
        .ranges_with_stale_heartbeat(JobState::Running, 1_000)
        .unwrap()
        .is_empty());
    assert_eq!(
        store
            .ranges_with_stale_heartbeat(JobState::Running, 1_001)
            .unwrap(),
        vec![("argon".to_string(), 0)]
    );
    assert!(store
        .ranges_with_stale_heartbeat(JobState::Stalled, 9_999)
        .unwrap()
        .is_empty());
}

// ---- assignments -------------------------------------------------------

#[test]
fn test_assignment_lifecycle() {
    let store = store();
    let assignment = AssignmentRow {
        log_name: "argon".to_string(),
        start: 0,
        worker_name: "w1".to_string(),
        assigned_at: 1_000,
        last_heartbeat_at: 1_000,
    };
    store.put_assignment(&assignment).unwrap();
    assert_eq!(store.assignment("argon", 0).unwrap().unwrap(), assignment);
    assert!(store.worker_holds_log("w1", "argon").unwrap());
    assert!(!store.worker_holds_log("w2", "argon").unwrap());

    store.touch_assignment("argon", 0, 2_000).unwrap();
    assert_eq!(
        store
            .assignment("argon", 0)
            .unwrap()
            .unwrap()
            .last_heartbeat_at,
        2_000
    );

    store.delete_assignment("argon", 0).unwrap();
    assert!(store.assignment("argon", 0).unwrap().is_none());
}

#[test]
fn test_put_assignment_replaces_the_holder() {
    let store = store();
    let mut assignment = AssignmentRow {
        log_name: "argon".to_string(),
        start: 0,
        worker_name: "w1".to_string(),
        assigned_at: 1_000,
        last_heartbeat_at: 1_000,
    };
    store.put_assignment(&assignment).unwrap();
    assignment.worker_name = "w2".to_string();
    store.put_assignment(&assignment).unwrap();
    assert_eq!(
        store.assignment("argon", 0).unwrap().unwrap().worker_name,
        "w2"
    );
}

// ---- certificates ------------------------------------------------------

#[test]
fn test_bulk_insert_rolls_back_on_unique_violation() {
    let store = store();
    store.insert_cert(&cert("111", 1), 0).unwrap();

    let batch = vec![cert("222", 2), cert("111", 3), cert("333", 4)];
    let err = store.insert_certs_bulk(&batch, 0).unwrap_err();
    assert!(is_unique_violation(&err));

    // Nothing from the failed batch survived.
    assert_eq!(store.cert_count().unwrap(), 1);
}

#[test]
fn test_single_insert_reports_unique_violation() {
    let store = store();
    store.insert_cert(&cert("111", 1), 0).unwrap();
    let err = store.insert_cert(&cert("111", 99), 0).unwrap_err();
    assert!(is_unique_violation(&err));

    // A different identity tuple goes through.
    store.insert_cert(&cert("112", 99), 0).unwrap();
    assert_eq!(store.cert_count().unwrap(), 2);
}
