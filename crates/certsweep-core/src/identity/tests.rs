//! Tests for worker identity.

use super::*;

#[test]
fn test_generated_names_are_deterministic_per_seed() {
    assert_eq!(name_from_seed("host-a"), name_from_seed("host-a"));
    assert_ne!(name_from_seed("host-a"), name_from_seed("host-b"));
}

#[test]
fn test_generated_names_have_the_expected_shape() {
    let name = name_from_seed("build-box-17");
    let parts: Vec<&str> = name.split('-').collect();
    assert_eq!(parts.len(), 3);
    assert!(WORDS.contains(&parts[0]));
    assert!(WORDS.contains(&parts[1]));
    assert_eq!(parts[2].len(), 4);
    assert!(parts[2].chars().all(|c| c.is_ascii_digit()));
}

#[test]
fn test_generated_names_pass_validation() {
    assert!(is_valid_worker_name(&name_from_seed("anything")));
    assert!(is_valid_worker_name(&default_worker_name()));
}

#[test]
fn test_validation_rejects_hostile_names() {
    assert!(!is_valid_worker_name(""));
    assert!(!is_valid_worker_name("two words"));
    assert!(!is_valid_worker_name("tab\tname"));
    assert!(!is_valid_worker_name("quote'name"));
    assert!(!is_valid_worker_name("semi;colon"));
    assert!(!is_valid_worker_name("slash/name"));
    assert!(!is_valid_worker_name(&"x".repeat(65)));
}

#[test]
fn test_validation_accepts_reasonable_names() {
    assert!(is_valid_worker_name("pin-kero-0042"));
    assert!(is_valid_worker_name("rack_7.node3"));
}

#[test]
fn test_resolve_prefers_a_valid_candidate() {
    assert_eq!(
        resolve_worker_name(Some("  my-worker ")),
        "my-worker".to_string()
    );
}

#[test]
fn test_resolve_regenerates_invalid_candidates() {
    let resolved = resolve_worker_name(Some("bad name; drop table"));
    assert!(is_valid_worker_name(&resolved));
    assert_ne!(resolved, "bad name; drop table");
}
