//! Tests for the failed-upload spool.

use super::*;

fn item(ct_index: i64) -> UploadItem {
    UploadItem {
        ct_entry: r#"{"leaf_input":"AAEC"}"#.to_string(),
        ct_log_url: "https://ct.example.com/argon/".to_string(),
        log_name: "argon".to_string(),
        worker_name: "pin-kero-0042".to_string(),
        ct_index,
        ip_address: None,
    }
}

#[test]
fn test_save_then_load_round_trips_the_batch() {
    let dir = tempfile::tempdir().unwrap();
    let spool = Spool::new(dir.path().join("upload_failure"));

    let batch: Vec<UploadItem> = (0..5).map(item).collect();
    let path = spool.save(&batch).unwrap();
    assert!(path.exists());
    let name = path.file_name().unwrap().to_str().unwrap();
    assert!(name.starts_with("upload_failure_"));
    assert!(name.ends_with(".json"));

    assert_eq!(spool.load(&path).unwrap(), batch);
}

#[test]
fn test_file_bodies_are_verbatim_upload_json() {
    let dir = tempfile::tempdir().unwrap();
    let spool = Spool::new(dir.path().to_path_buf());
    let path = spool.save(&[item(7)]).unwrap();

    // The body must deserialize as a plain upload array, exactly what
    // a replay posts.
    let raw = std::fs::read_to_string(&path).unwrap();
    let parsed: Vec<UploadItem> = serde_json::from_str(&raw).unwrap();
    assert_eq!(parsed, vec![item(7)]);
}

#[test]
fn test_scan_lists_only_spool_files_sorted() {
    let dir = tempfile::tempdir().unwrap();
    let spool = Spool::new(dir.path().to_path_buf());
    spool.save(&[item(1)]).unwrap();
    spool.save(&[item(2)]).unwrap();
    std::fs::write(dir.path().join("unrelated.txt"), b"noise").unwrap();
    std::fs::write(dir.path().join("other.json"), b"[]").unwrap();

    let files = spool.scan().unwrap();
    assert_eq!(files.len(), 2);
    let sorted = {
        let mut copy = files.clone();
        copy.sort();
        copy
    };
    assert_eq!(files, sorted);
}

#[test]
fn test_scan_of_missing_directory_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let spool = Spool::new(dir.path().join("never_created"));
    assert!(spool.scan().unwrap().is_empty());
}

#[test]
fn test_remove_deletes_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let spool = Spool::new(dir.path().to_path_buf());
    let path = spool.save(&[item(1)]).unwrap();
    spool.remove(&path).unwrap();
    assert!(!path.exists());
    assert!(spool.scan().unwrap().is_empty());
}

#[test]
fn test_corrupt_files_fail_to_load_but_survive() {
    let dir = tempfile::tempdir().unwrap();
    let spool = Spool::new(dir.path().to_path_buf());
    let path = dir.path().join("upload_failure_20260101_000000_1234.json");
    std::fs::write(&path, b"{corrupt").unwrap();

    assert!(matches!(
        spool.load(&path).unwrap_err(),
        SpoolError::Json(_)
    ));
    // The scanner still lists it; only a successful upload removes
    // files.
    assert_eq!(spool.scan().unwrap().len(), 1);
}

#[test]
fn test_concurrent_saves_never_collide() {
    let dir = tempfile::tempdir().unwrap();
    let spool = Spool::new(dir.path().to_path_buf());

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let spool = spool.clone();
            std::thread::spawn(move || spool.save(&[item(i)]).unwrap())
        })
        .collect();
    let mut paths: Vec<PathBuf> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    paths.sort();
    paths.dedup();
    assert_eq!(paths.len(), 8);
    assert_eq!(spool.scan().unwrap().len(), 8);
}
