//! End-to-end decode-and-extract tests against real DER fixtures.
//!
//! `fixtures/ct_entries.json` holds two self-signed certificates (one
//! with `.jp` names, one without) wrapped into synthetic Merkle leaves
//! the same way a CT log serves them.

use certsweep_core::cert::{CertError, CertSummary, SuffixFilter};
use certsweep_core::entry::{LeafKind, RawEntry};

const FIXTURES: &str = include_str!("fixtures/ct_entries.json");

/// Log timestamp baked into every fixture leaf, in milliseconds.
const FIXTURE_TIMESTAMP_MS: i64 = 1_754_000_000_000;

fn fixture(name: &str) -> String {
    let value: serde_json::Value = serde_json::from_str(FIXTURES).unwrap();
    value[name].as_str().unwrap().to_string()
}

fn jp_entry() -> RawEntry {
    RawEntry {
        leaf_input: fixture("x509_leaf_jp"),
        extra_data: None,
    }
}

#[test]
fn x509_leaf_decodes_to_a_parseable_certificate() {
    let decoded = jp_entry().decode().unwrap();
    assert_eq!(decoded.kind, LeafKind::X509);
    assert_eq!(
        decoded.timestamp.timestamp_millis(),
        FIXTURE_TIMESTAMP_MS
    );

    let summary = CertSummary::parse(&decoded.certificate_der).unwrap();
    assert_eq!(summary.issuer, "Example KK");
    assert_eq!(summary.serial_number, "123456789");
    assert_eq!(summary.common_name.as_deref(), Some("www.example.jp"));
    assert_eq!(summary.not_before.timestamp(), 1_785_650_829);
    assert_eq!(summary.not_after.timestamp(), 2_101_010_829);
}

#[test]
fn name_union_covers_cn_and_san() {
    let decoded = jp_entry().decode().unwrap();
    let summary = CertSummary::parse(&decoded.certificate_der).unwrap();
    assert_eq!(
        summary.names,
        vec![
            "www.example.jp".to_string(),
            "www.example.jp".to_string(),
            "api.example.jp".to_string(),
            "example.com".to_string(),
        ]
    );
}

#[test]
fn suffix_filter_decides_acceptance() {
    let jp = SuffixFilter::new(".jp");
    let com = SuffixFilter::new(".com");

    let decoded = jp_entry().decode().unwrap();
    let summary = CertSummary::parse(&decoded.certificate_der).unwrap();
    assert!(jp.accepts(&summary.names));
    assert!(com.accepts(&summary.names)); // example.com rides along

    let other = RawEntry {
        leaf_input: fixture("x509_leaf_com"),
        extra_data: None,
    };
    let summary = CertSummary::parse(&other.decode().unwrap().certificate_der).unwrap();
    assert!(!jp.accepts(&summary.names));
    assert!(com.accepts(&summary.names));
}

#[test]
fn precert_leaf_recovers_the_certificate_from_extra_data() {
    let entry = RawEntry {
        leaf_input: fixture("precert_leaf"),
        extra_data: Some(fixture("precert_extra")),
    };
    let decoded = entry.decode().unwrap();
    assert_eq!(decoded.kind, LeafKind::Precert);

    let summary = CertSummary::parse(&decoded.certificate_der).unwrap();
    assert_eq!(summary.common_name.as_deref(), Some("www.example.jp"));
}

#[test]
fn fingerprints_are_stable_across_repeated_parses() {
    let decoded = jp_entry().decode().unwrap();
    let first = CertSummary::parse(&decoded.certificate_der).unwrap();
    let second = CertSummary::parse(&decoded.certificate_der).unwrap();
    assert_eq!(first.fingerprint(), second.fingerprint());

    // The precert fixture wraps the same certificate, so the identity
    // tuple agrees with the x509 path.
    let precert = RawEntry {
        leaf_input: fixture("precert_leaf"),
        extra_data: Some(fixture("precert_extra")),
    };
    let precert_summary =
        CertSummary::parse(&precert.decode().unwrap().certificate_der).unwrap();
    assert_eq!(first.fingerprint(), precert_summary.fingerprint());
}

#[test]
fn get_entries_response_shape_deserializes() {
    let response = serde_json::json!({
        "entries": [
            {"leaf_input": fixture("x509_leaf_jp")},
            {"leaf_input": fixture("precert_leaf"), "extra_data": fixture("precert_extra")},
        ]
    });
    let entries: Vec<RawEntry> =
        serde_json::from_value(response["entries"].clone()).unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries[0].decode().is_ok());
    assert!(entries[1].decode().is_ok());
}

#[test]
fn garbage_der_is_a_parse_error() {
    let err = CertSummary::parse(b"definitely not der").unwrap_err();
    assert!(matches!(err, CertError::Der(_)));
}
