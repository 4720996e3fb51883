//! Upload ingestion: batch dedup, bulk insert, step-wise fallback.
//!
//! The happy path is one transaction for the whole batch. When the
//! bulk insert fails (typically a unique-constraint violation from a
//! racing worker whose cache stripe was evicted, or transient I/O)
//! the batch is replayed record by record: constraint violations are
//! reclassified as duplicates (the cache entry stays), anything else
//! counts as a failure and the fingerprint is rolled back out of the
//! cache so a later retry is not falsely suppressed.

use certsweep_core::cert::CertSummary;
use certsweep_core::entry::RawEntry;
use certsweep_core::protocol::{UploadItem, UploadResponse};
use chrono::Utc;
use tracing::{debug, warn};

use crate::cache::{CacheOutcome, DuplicateCache};
use crate::store::{NewCertificate, Store, is_unique_violation};


/// Processes one upload batch and reports per-record outcomes.
///
/// Records whose `ct_entry` cannot be decoded count as failures; the
/// rest are partitioned through the cache and persisted. The caller
/// has already enforced the batch size bound.
pub fn ingest_batch(store: &Store, cache: &DuplicateCache, items: &[UploadItem]) -> UploadResponse {
    let mut response = UploadResponse::default();
    let mut fresh: Vec<NewCertificate> = Vec::with_capacity(items.len());

    for item in items {
        let fingerprint = match parse_fingerprint(item) {
            Ok(fingerprint) => fingerprint,
            Err(reason) => {
                debug!(
                    log_name = %item.log_name,
                    ct_index = item.ct_index,
                    reason = %reason,
                    "upload record rejected by parser"
                );
                response.failures += 1;
                continue;
            }
        };

        match cache.check_and_add(&fingerprint) {
            CacheOutcome::Hit => response.duplicates += 1,
            CacheOutcome::Miss => fresh.push(NewCertificate {
                ct_entry: item.ct_entry.clone(),
                log_url: item.ct_log_url.clone(),
                log_name: item.log_name.clone(),
                worker_name: item.worker_name.clone(),
                ct_index: item.ct_index,
                ip_address: item.ip_address.clone(),
                fingerprint,
            }),
        }
    }

    if fresh.is_empty() {
        return response;
    }

    let created_at = Utc::now().timestamp();
    match store.insert_certs_bulk(&fresh, created_at) {
        Ok(()) => {
            response.inserted += fresh.len() as u64;
            response
        }
        Err(err) => {
            debug!(error = %err, batch = fresh.len(), "bulk insert failed, stepping through records");
            step_wise_insert(store, cache, &fresh, created_at, response)
        }
    }
}

/// Per-record fallback after a failed bulk insert.
fn step_wise_insert(
    store: &Store,
    cache: &DuplicateCache,
    fresh: &[NewCertificate],
    created_at: i64,
    mut response: UploadResponse,
) -> UploadResponse {
    for cert in fresh {
        match store.insert_cert(cert, created_at) {
            Ok(()) => response.inserted += 1,
            Err(err) if is_unique_violation(&err) => {
                // A racing worker beat us to it; the cache entry is
                // correct and stays.
                response.duplicates += 1;
            }
            Err(err) => {
                warn!(
                    log_name = %cert.log_name,
                    ct_index = cert.ct_index,
                    error = %err,
                    "record insert failed, rolling fingerprint out of cache"
                );
                cache.remove(&cert.fingerprint);
                response.failures += 1;
            }
        }
    }
    response
}

fn parse_fingerprint(
    item: &UploadItem,
) -> Result<certsweep_core::cert::CertFingerprint, String> {
    let entry: RawEntry =
        serde_json::from_str(&item.ct_entry).map_err(|err| format!("entry json: {err}"))?;
    let leaf = entry.decode().map_err(|err| format!("leaf: {err}"))?;
    let summary =
        CertSummary::parse(&leaf.certificate_der).map_err(|err| format!("certificate: {err}"))?;
    Ok(summary.fingerprint())
}
