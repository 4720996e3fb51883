//! The per-category fetch loop.
//!
//! Each category thread cycles through one state machine:
//!
//! ```text
//! ACQUIRE -> FETCH -> PARSE -> BUFFER -> [UPLOAD?] -> FETCH ...
//!    ^                                      |
//!    |            COMPLETE / ERROR / RESUME +
//! ```
//!
//! - no work: jittered 1-10 s sleep, then ACQUIRE again
//! - 429: honor `Retry-After`, otherwise full-jitter backoff
//! - 5xx / transport: full-jitter backoff up to the retry budget
//! - other 4xx: report the range failed and abandon it
//! - buffer full or flush timer: upload in batches; failures spool
//! - stop flag: drain the buffer to the spool, hand the range back
//!   with `resume`, exit
//!
//! Within one range the cursor only moves forward, so uploaded batches
//! are index-monotonic; across ranges nothing is ordered.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use certsweep_core::backoff::{RetryPolicy, idle_jitter};
use certsweep_core::cert::{CertFingerprint, CertSummary, SuffixFilter};
use certsweep_core::entry::RawEntry;
use certsweep_core::protocol::{AssignedRange, HeartbeatRequest, UploadItem};
use tracing::{debug, error, info, warn};

use crate::client::{CtLogClient, FetchError, ManagerClient};
use crate::config::WorkerConfig;
use crate::shutdown::sleep_unless_stopped;
use crate::spool::Spool;


/// Consecutive fetch failures tolerated before the range is reported
/// failed.
const MAX_FETCH_ATTEMPTS: u32 = 8;

/// Consecutive empty 200 responses tolerated before the range is
/// handed back; guards against wedged logs that answer but never
/// serve.
const MAX_EMPTY_RESPONSES: u32 = 10;

/// One suffix-matching certificate waiting for upload.
struct BufferedCert {
    item: UploadItem,
    fingerprint: CertFingerprint,
}

/// Per-thread upload buffer with in-buffer duplicate suppression.
#[derive(Default)]
pub(crate) struct UploadBuffer {
    certs: Vec<BufferedCert>,
    seen: HashSet<CertFingerprint>,
}

impl UploadBuffer {
    fn new() -> Self {
        Self::default()
    }

    /// Appends unless an equal fingerprint is already buffered.
    fn push(&mut self, item: UploadItem, fingerprint: CertFingerprint) -> bool {
        if !self.seen.insert(fingerprint.clone()) {
            return false;
        }
        self.certs.push(BufferedCert { item, fingerprint });
        true
    }

    fn len(&self) -> usize {
        self.certs.len()
    }

    fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }

    /// Removes and returns up to `max` of the oldest buffered items.
    fn take_chunk(&mut self, max: usize) -> Vec<UploadItem> {
        let count = max.min(self.certs.len());
        self.certs
            .drain(..count)
            .map(|buffered| {
                self.seen.remove(&buffered.fingerprint);
                buffered.item
            })
            .collect()
    }
}

/// Outcome of filtering one window of entries.
pub(crate) struct FilteredWindow {
    /// Accepted items with their identity tuples, in index order.
    accepted: Vec<(UploadItem, CertFingerprint)>,
    /// Entries that could not be decoded; logged and skipped, the
    /// cursor advances past them.
    parse_failures: usize,
}

/// Decodes, extracts, and suffix-filters one window of raw entries.
/// Entry `i` of the window has index `base_index + i`.
pub(crate) fn filter_window(
    entries: &[RawEntry],
    base_index: i64,
    range: &AssignedRange,
    worker_name: &str,
    filter: &SuffixFilter,
) -> FilteredWindow {
    let mut accepted = Vec::new();
    let mut parse_failures = 0usize;

    for (offset, entry) in entries.iter().enumerate() {
        let ct_index = base_index + i64::try_from(offset).unwrap_or(i64::MAX);
        let summary = match entry.decode().map_err(|err| err.to_string()).and_then(|leaf| {
            CertSummary::parse(&leaf.certificate_der).map_err(|err| err.to_string())
        }) {
            Ok(summary) => summary,
            Err(reason) => {
                debug!(
                    log_name = %range.log_name,
                    ct_index,
                    reason = %reason,
                    "entry skipped by parser"
                );
                parse_failures += 1;
                continue;
            }
        };
        if !filter.accepts(&summary.names) {
            continue;
        }
        let Ok(ct_entry) = serde_json::to_string(entry) else {
            parse_failures += 1;
            continue;
        };
        accepted.push((
            UploadItem {
                ct_entry,
                ct_log_url: range.log_url.clone(),
                log_name: range.log_name.clone(),
                worker_name: worker_name.to_string(),
                ct_index,
                ip_address: None,
            },
            summary.fingerprint(),
        ));
    }

    FilteredWindow {
        accepted,
        parse_failures,
    }
}

/// Inclusive end parameter for the next `get-entries` call.
pub(crate) fn window_end(cursor: i64, fetch_window: i64, range_end: i64) -> i64 {
    (cursor + fetch_window).min(range_end) - 1
}

/// A category fetch thread.
pub struct FetchLoop {
    category: String,
    config: WorkerConfig,
    manager: ManagerClient,
    ctlog: CtLogClient,
    spool: Spool,
    policy: RetryPolicy,
    stop: &'static AtomicBool,
}

impl FetchLoop {
    /// Wires a fetch loop for one category. Clients are owned by this
    /// loop and die with its thread.
    pub fn new(
        category: String,
        config: WorkerConfig,
        manager: ManagerClient,
        ctlog: CtLogClient,
        spool: Spool,
        stop: &'static AtomicBool,
    ) -> Self {
        Self {
            category,
            config,
            manager,
            ctlog,
            spool,
            policy: RetryPolicy::default(),
            stop,
        }
    }

    /// Thread body: acquire and work ranges until the stop flag rises.
    pub fn run(&self) {
        info!(category = %self.category, "fetch thread started");
        let mut acquire_failures: u32 = 0;
        while !self.stop.load(Ordering::Acquire) {
            match self.manager.acquire(&self.category) {
                Ok(Some(range)) => {
                    acquire_failures = 0;
                    self.run_range(&range);
                }
                Ok(None) => {
                    acquire_failures = 0;
                    debug!(category = %self.category, "category saturated, idling");
                    sleep_unless_stopped(self.stop, idle_jitter());
                }
                Err(err) => {
                    acquire_failures = acquire_failures.saturating_add(1);
                    warn!(
                        category = %self.category,
                        error = %err,
                        failures = acquire_failures,
                        "acquire failed"
                    );
                    sleep_unless_stopped(
                        self.stop,
                        self.policy.jittered_delay_for_attempt(acquire_failures),
                    );
                }
            }
        }
        info!(category = %self.category, "fetch thread stopped");
    }

    /// Works one assigned range to completion, hand-back, or failure.
    fn run_range(&self, range: &AssignedRange) {
        let filter = SuffixFilter::new(&self.config.suffix);
        let mut cursor = range.current;
        let mut last_uploaded: Option<i64> = None;
        let mut matched: u64 = 0;
        let mut buffer = UploadBuffer::new();
        let mut attempts: u32 = 0;
        let mut empty_streak: u32 = 0;
        let mut last_flush = Instant::now();
        let mut last_heartbeat = Instant::now();

        info!(
            category = %self.category,
            log_name = %range.log_name,
            start = range.start,
            end = range.end,
            cursor,
            "range started"
        );

        while cursor < range.end {
            if self.stop.load(Ordering::Acquire) {
                self.hand_back(range, cursor, &mut buffer);
                return;
            }

            match self.ctlog.get_entries(
                &range.log_url,
                cursor,
                window_end(cursor, self.config.fetch_window, range.end),
            ) {
                Ok(entries) if entries.is_empty() => {
                    attempts = 0;
                    empty_streak += 1;
                    if empty_streak >= MAX_EMPTY_RESPONSES {
                        warn!(
                            log_name = %range.log_name,
                            cursor,
                            "log keeps returning empty windows, handing range back"
                        );
                        self.hand_back(range, cursor, &mut buffer);
                        return;
                    }
                    sleep_unless_stopped(
                        self.stop,
                        self.policy.jittered_delay_for_attempt(empty_streak),
                    );
                }
                Ok(entries) => {
                    attempts = 0;
                    empty_streak = 0;
                    let window = filter_window(
                        &entries,
                        cursor,
                        range,
                        self.manager.worker_name(),
                        &filter,
                    );
                    if window.parse_failures > 0 {
                        debug!(
                            log_name = %range.log_name,
                            cursor,
                            skipped = window.parse_failures,
                            "entries skipped by parser"
                        );
                    }
                    matched += window.accepted.len() as u64;
                    for (item, fingerprint) in window.accepted {
                        buffer.push(item, fingerprint);
                    }
                    cursor += i64::try_from(entries.len()).unwrap_or(0);

                    while buffer.len() >= self.config.batch_size {
                        last_uploaded = self.flush_chunk(&mut buffer, last_uploaded);
                        last_flush = Instant::now();
                    }
                }
                Err(FetchError::RateLimited { retry_after }) => {
                    attempts += 1;
                    if attempts > MAX_FETCH_ATTEMPTS {
                        self.fail_range(
                            range,
                            cursor,
                            "rate limited beyond the retry budget",
                            &mut buffer,
                        );
                        return;
                    }
                    let delay = retry_after
                        .unwrap_or_else(|| self.policy.jittered_delay_for_attempt(attempts));
                    debug!(
                        log_name = %range.log_name,
                        cursor,
                        delay_secs = delay.as_secs(),
                        "rate limited, backing off"
                    );
                    sleep_unless_stopped(self.stop, delay);
                }
                Err(FetchError::Permanent { status, body }) => {
                    self.fail_range(
                        range,
                        cursor,
                        &format!("log rejected get-entries with {status}: {body}"),
                        &mut buffer,
                    );
                    return;
                }
                Err(err) => {
                    attempts += 1;
                    if attempts > MAX_FETCH_ATTEMPTS {
                        self.fail_range(
                            range,
                            cursor,
                            &format!("fetch failed beyond the retry budget: {err}"),
                            &mut buffer,
                        );
                        return;
                    }
                    debug!(
                        log_name = %range.log_name,
                        cursor,
                        attempt = attempts,
                        error = %err,
                        "transient fetch failure, backing off"
                    );
                    sleep_unless_stopped(
                        self.stop,
                        self.policy.jittered_delay_for_attempt(attempts),
                    );
                }
            }

            if !buffer.is_empty() && last_flush.elapsed() >= self.config.flush_interval {
                while !buffer.is_empty() {
                    last_uploaded = self.flush_chunk(&mut buffer, last_uploaded);
                }
                last_flush = Instant::now();
            }

            if last_heartbeat.elapsed() >= self.config.heartbeat_interval {
                if !self.send_heartbeat(range, cursor, last_uploaded, matched) {
                    warn!(
                        log_name = %range.log_name,
                        start = range.start,
                        "assignment no longer ours, abandoning range"
                    );
                    self.spool_remaining(&mut buffer);
                    return;
                }
                last_heartbeat = Instant::now();
            }
        }

        // Cursor reached end: drain, final heartbeat, complete.
        while !buffer.is_empty() {
            last_uploaded = self.flush_chunk(&mut buffer, last_uploaded);
        }
        self.send_heartbeat(range, cursor, last_uploaded, matched);
        match self.manager.complete(&range.log_name, range.start) {
            Ok(ack) if ack.ok => info!(
                category = %self.category,
                log_name = %range.log_name,
                start = range.start,
                end = range.end,
                matched,
                "range complete"
            ),
            Ok(_) => warn!(
                log_name = %range.log_name,
                start = range.start,
                "manager refused completion"
            ),
            Err(err) => warn!(
                log_name = %range.log_name,
                start = range.start,
                error = %err,
                "failed to report completion"
            ),
        }
    }

    /// Uploads one batch-sized chunk; on rejection the chunk goes to
    /// the spool and the watermark stays put.
    fn flush_chunk(&self, buffer: &mut UploadBuffer, last_uploaded: Option<i64>) -> Option<i64> {
        let chunk = buffer.take_chunk(self.config.batch_size);
        if chunk.is_empty() {
            return last_uploaded;
        }
        let highest = chunk.iter().map(|item| item.ct_index).max();
        match self.manager.upload(&chunk) {
            Ok(response) => {
                debug!(
                    category = %self.category,
                    records = chunk.len(),
                    inserted = response.inserted,
                    duplicates = response.duplicates,
                    failures = response.failures,
                    "batch uploaded"
                );
                last_uploaded.max(highest)
            }
            Err(err) => {
                warn!(category = %self.category, error = %err, "upload failed, spooling batch");
                if let Err(spool_err) = self.spool.save(&chunk) {
                    // A worker that can neither upload nor spool is
                    // losing data; take the whole process down.
                    error!(error = %spool_err, "failed to spool rejected batch");
                    crate::shutdown::request_fatal();
                }
                last_uploaded
            }
        }
    }

    /// Progress report; `false` means the Manager disowned us.
    fn send_heartbeat(
        &self,
        range: &AssignedRange,
        cursor: i64,
        last_uploaded: Option<i64>,
        matched: u64,
    ) -> bool {
        let request = HeartbeatRequest {
            worker_name: self.manager.worker_name().to_string(),
            log_name: range.log_name.clone(),
            start: range.start,
            current: cursor,
            last_uploaded_index: last_uploaded,
            matched_count: Some(matched),
        };
        match self.manager.heartbeat(&request) {
            Ok(ack) => ack.ok,
            Err(err) => {
                // An unreachable Manager is not a disownment; keep
                // working and let the spool absorb uploads.
                debug!(error = %err, "heartbeat not delivered");
                true
            }
        }
    }

    /// Shutdown or wedge path: drain to the spool and hand the range
    /// back with its live cursor.
    fn hand_back(&self, range: &AssignedRange, cursor: i64, buffer: &mut UploadBuffer) {
        self.spool_remaining(buffer);
        match self.manager.resume(&range.log_name, range.start, cursor) {
            Ok(ack) if ack.ok => info!(
                log_name = %range.log_name,
                start = range.start,
                cursor,
                "range handed back"
            ),
            Ok(_) => debug!(
                log_name = %range.log_name,
                start = range.start,
                "resume ignored by manager"
            ),
            Err(err) => warn!(
                log_name = %range.log_name,
                start = range.start,
                error = %err,
                "failed to hand range back"
            ),
        }
    }

    /// Permanent failure path: spool what we have and report the
    /// range failed.
    fn fail_range(
        &self,
        range: &AssignedRange,
        cursor: i64,
        message: &str,
        buffer: &mut UploadBuffer,
    ) {
        error!(
            category = %self.category,
            log_name = %range.log_name,
            start = range.start,
            cursor,
            reason = message,
            "range failed"
        );
        self.spool_remaining(buffer);
        if let Err(err) = self.manager.report_error(&range.log_name, range.start, message) {
            warn!(error = %err, "failed to deliver error report");
        }
    }

    /// Writes every buffered batch to the spool.
    fn spool_remaining(&self, buffer: &mut UploadBuffer) {
        while !buffer.is_empty() {
            let chunk = buffer.take_chunk(self.config.batch_size);
            if let Err(err) = self.spool.save(&chunk) {
                error!(error = %err, records = chunk.len(), "failed to spool buffered batch");
                crate::shutdown::request_fatal();
                return;
            }
        }
    }
}
