//! Job coordination.
//!
//! The coordinator owns the lifecycle of every job range:
//!
//! ```text
//! PENDING --acquire--> RUNNING --complete--> COMPLETE
//!    ^                  |  |  \
//!    |                  |  |   `--error--> FAILED
//!    |   +--resume------+  `--stale heartbeat--> STALLED
//!    |   |                                         |
//!    +---+------- abandonment threshold -----------+
//! ```
//!
//! `acquire` and the reaper serialize on a per-category mutex so two
//! racing workers can never be handed the same range. Heartbeat,
//! complete and resume touch a single range row each and lean on the
//! store's serialized connection instead.
//!
//! Crash behavior: the only state that can be lost is cursor progress
//! since the last heartbeat. The reaper eventually hands the range
//! back out at its last recorded `current`; the overlap a second
//! worker re-fetches is absorbed by the duplicate cache and the
//! store's UNIQUE index.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use certsweep_core::protocol::{
    AssignedRange, CompleteRequest, ErrorReport, HeartbeatRequest, ResumeRequest,
};
use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::store::{AssignmentRow, JobRangeRow, JobState, Store, StoreError};


/// Default width of a freshly partitioned job range.
pub const DEFAULT_CHUNK_WIDTH: i64 = 1 << 14;

/// Coordinator tuning.
#[derive(Debug, Clone, Copy)]
pub struct CoordinatorConfig {
    /// Width of newly partitioned ranges.
    pub chunk_width: i64,
    /// Heartbeat age at which a RUNNING range is marked STALLED.
    pub stale_threshold: Duration,
    /// Heartbeat age at which a STALLED range is returned to PENDING.
    pub abandon_threshold: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            chunk_width: DEFAULT_CHUNK_WIDTH,
            stale_threshold: Duration::from_secs(300),
            abandon_threshold: Duration::from_secs(900),
        }
    }
}

/// Errors surfaced by coordination operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CoordinatorError {
    /// Store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The Manager-side job coordinator.
pub struct Coordinator {
    store: Store,
    config: CoordinatorConfig,
    category_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    rotation: Mutex<HashMap<String, usize>>,
}

impl Coordinator {
    /// Creates a coordinator over `store`.
    #[must_use]
    pub fn new(store: Store, config: CoordinatorConfig) -> Self {
        Self {
            store,
            config,
            category_locks: Mutex::new(HashMap::new()),
            rotation: Mutex::new(HashMap::new()),
        }
    }

    fn category_lock(&self, category: &str) -> Arc<Mutex<()>> {
        let mut locks = self
            .category_locks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(
            locks
                .entry(category.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    fn next_rotation(&self, category: &str, len: usize) -> usize {
        let mut rotation = self
            .rotation
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let counter = rotation.entry(category.to_string()).or_insert(0);
        let offset = *counter;
        *counter = counter.wrapping_add(1);
        if len == 0 { 0 } else { offset % len }
    }

    /// Extends a log's ranges to cover `[0, tree_size)` in fixed-width
    /// chunks. Idempotent; only the uncovered tail is partitioned.
    ///
    /// # Errors
    ///
    /// Returns an error on store failure.
    pub fn ensure_ranges(&self, log_name: &str) -> Result<usize, CoordinatorError> {
        let Some(log) = self.store.log(log_name)? else {
            return Ok(0);
        };
        let mut cursor = self.store.max_range_end(log_name)?.unwrap_or(0);
        let mut created = 0;
        while cursor < log.tree_size {
            let end = (cursor + self.config.chunk_width).min(log.tree_size);
            self.store.insert_range(&JobRangeRow {
                log_name: log_name.to_string(),
                start: cursor,
                end,
                current: cursor,
                last_uploaded_index: cursor - 1,
                state: JobState::Pending,
            })?;
            cursor = end;
            created += 1;
        }
        if created > 0 {
            debug!(log_name, created, tree_size = log.tree_size, "partitioned new ranges");
        }
        Ok(created)
    }

    /// Atomically selects a range for `worker_name` in `category` and
    /// marks it RUNNING. Stalled ranges are handed out first (resume
    /// priority), then pending ranges, round-robin across the
    /// category's logs. Returns `None` when the category is saturated
    /// or empty. A worker is never given two ranges of the same log.
    ///
    /// # Errors
    ///
    /// Returns an error on store failure.
    pub fn acquire(
        &self,
        worker_name: &str,
        category: &str,
    ) -> Result<Option<AssignedRange>, CoordinatorError> {
        let lock = self.category_lock(category);
        let _guard = lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let now = Utc::now().timestamp();

        // Resume priority: stalled ranges, oldest heartbeat first.
        for (range, held_by) in self.store.stalled_ranges(category)? {
            if held_by.worker_name != worker_name
                && self.store.worker_holds_log(worker_name, &range.log_name)?
            {
                continue;
            }
            info!(
                log_name = %range.log_name,
                start = range.start,
                current = range.current,
                previous_worker = %held_by.worker_name,
                worker_name,
                "reassigning stalled range"
            );
            return self.assign(worker_name, &range, now).map(Some);
        }

        let logs = self.store.logs_in_category(category)?;
        if logs.is_empty() {
            return Ok(None);
        }
        let offset = self.next_rotation(category, logs.len());
        for step in 0..logs.len() {
            let log = &logs[(offset + step) % logs.len()];
            if self.store.worker_holds_log(worker_name, &log.log_name)? {
                continue;
            }
            if let Some(range) = self.store.pending_range(&log.log_name)? {
                return self.assign(worker_name, &range, now).map(Some);
            }
        }
        Ok(None)
    }

    fn assign(
        &self,
        worker_name: &str,
        range: &JobRangeRow,
        now: i64,
    ) -> Result<AssignedRange, CoordinatorError> {
        let log_url = self
            .store
            .log(&range.log_name)?
            .map(|log| log.log_url)
            .unwrap_or_default();
        self.store.put_assignment(&AssignmentRow {
            log_name: range.log_name.clone(),
            start: range.start,
            worker_name: worker_name.to_string(),
            assigned_at: now,
            last_heartbeat_at: now,
        })?;
        self.store
            .set_range_state(&range.log_name, range.start, JobState::Running)?;
        Ok(AssignedRange {
            log_name: range.log_name.clone(),
            log_url,
            start: range.start,
            end: range.end,
            current: range.current,
        })
    }

    /// Records a heartbeat. The cursor only moves forward; a stale or
    /// regressive `current` is accepted without rewinding. Returns
    /// `false` when the assignment is not owned by the caller.
    ///
    /// # Errors
    ///
    /// Returns an error on store failure.
    pub fn heartbeat(&self, request: &HeartbeatRequest) -> Result<bool, CoordinatorError> {
        let Some(assignment) = self.store.assignment(&request.log_name, request.start)? else {
            debug!(
                worker_name = %request.worker_name,
                log_name = %request.log_name,
                start = request.start,
                "heartbeat for unassigned range ignored"
            );
            return Ok(false);
        };
        if assignment.worker_name != request.worker_name {
            warn!(
                worker_name = %request.worker_name,
                holder = %assignment.worker_name,
                log_name = %request.log_name,
                start = request.start,
                "heartbeat from non-holder ignored"
            );
            return Ok(false);
        }

        self.store.advance_cursor(
            &request.log_name,
            request.start,
            request.current,
            request.last_uploaded_index,
        )?;
        self.store
            .touch_assignment(&request.log_name, request.start, Utc::now().timestamp())?;

        // A live heartbeat revives a range the reaper had written off.
        if let Some(range) = self.store.range(&request.log_name, request.start)? {
            if range.state == JobState::Stalled {
                self.store
                    .set_range_state(&request.log_name, request.start, JobState::Running)?;
            }
        }
        Ok(true)
    }

    /// Marks a range COMPLETE and clears its assignment. Requires the
    /// caller to hold the assignment and the cursor to have reached
    /// `end`.
    ///
    /// # Errors
    ///
    /// Returns an error on store failure.
    pub fn complete(&self, request: &CompleteRequest) -> Result<bool, CoordinatorError> {
        let Some(assignment) = self.store.assignment(&request.log_name, request.start)? else {
            return Ok(false);
        };
        if assignment.worker_name != request.worker_name {
            return Ok(false);
        }
        let Some(range) = self.store.range(&request.log_name, request.start)? else {
            return Ok(false);
        };
        if range.current != range.end {
            warn!(
                log_name = %request.log_name,
                start = request.start,
                current = range.current,
                end = range.end,
                "complete refused before cursor reached end"
            );
            return Ok(false);
        }
        self.store
            .set_range_state(&request.log_name, request.start, JobState::Complete)?;
        self.store.delete_assignment(&request.log_name, request.start)?;
        info!(
            log_name = %request.log_name,
            start = request.start,
            end = range.end,
            worker_name = %request.worker_name,
            "range complete"
        );
        Ok(true)
    }

    /// Worker-initiated hand-back on shutdown: RUNNING → PENDING with
    /// the cursor preserved and the assignment cleared. Idempotent:
    /// repeating the call, or racing the reaper, still ends PENDING.
    ///
    /// # Errors
    ///
    /// Returns an error on store failure.
    pub fn resume(&self, request: &ResumeRequest) -> Result<bool, CoordinatorError> {
        let Some(range) = self.store.range(&request.log_name, request.start)? else {
            return Ok(false);
        };
        match self.store.assignment(&request.log_name, request.start)? {
            Some(assignment) if assignment.worker_name != request.worker_name => {
                return Ok(false);
            }
            Some(_) => {
                self.store.delete_assignment(&request.log_name, request.start)?;
            }
            // The reaper may have reclaimed the range already; treat
            // the repeat as applied. Terminal states stay put.
            None if range.state == JobState::Pending => return Ok(true),
            None => return Ok(false),
        }
        self.store
            .advance_cursor(&request.log_name, request.start, request.current, None)?;
        self.store
            .set_range_state(&request.log_name, request.start, JobState::Pending)?;
        info!(
            log_name = %request.log_name,
            start = request.start,
            current = request.current,
            worker_name = %request.worker_name,
            "range handed back for resume"
        );
        Ok(true)
    }

    /// Records a worker-reported terminal failure: the range goes to
    /// FAILED and the assignment is cleared.
    ///
    /// # Errors
    ///
    /// Returns an error on store failure.
    pub fn report_failed(&self, report: &ErrorReport) -> Result<bool, CoordinatorError> {
        if self.store.range(&report.log_name, report.start)?.is_none() {
            return Ok(false);
        }
        warn!(
            log_name = %report.log_name,
            start = report.start,
            worker_name = %report.worker_name,
            reason = %report.message,
            "range failed"
        );
        self.store
            .set_range_state(&report.log_name, report.start, JobState::Failed)?;
        self.store.delete_assignment(&report.log_name, report.start)?;
        Ok(true)
    }

    /// One reaper sweep at the current wall clock.
    ///
    /// # Errors
    ///
    /// Returns an error on store failure.
    pub fn reap_stale(&self) -> Result<ReapOutcome, CoordinatorError> {
        self.reap_stale_at(Utc::now().timestamp())
    }

    /// One reaper sweep at an explicit instant: RUNNING ranges whose
    /// heartbeat is older than the stale threshold become STALLED;
    /// STALLED ranges past the abandonment threshold drop their
    /// assignment and return to PENDING at their recorded cursor.
    ///
    /// # Errors
    ///
    /// Returns an error on store failure.
    pub fn reap_stale_at(&self, now: i64) -> Result<ReapOutcome, CoordinatorError> {
        let mut outcome = ReapOutcome::default();
        let stale_cutoff =
            now - i64::try_from(self.config.stale_threshold.as_secs()).unwrap_or(i64::MAX);
        let abandon_cutoff =
            now - i64::try_from(self.config.abandon_threshold.as_secs()).unwrap_or(i64::MAX);

        for (log_name, start) in self
            .store
            .ranges_with_stale_heartbeat(JobState::Running, stale_cutoff)?
        {
            let lock = self.category_lock(&self.category_of(&log_name)?);
            let _guard = lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            self.store.set_range_state(&log_name, start, JobState::Stalled)?;
            warn!(log_name = %log_name, start, "assignment heartbeat stale, range stalled");
            outcome.stalled += 1;
        }

        for (log_name, start) in self
            .store
            .ranges_with_stale_heartbeat(JobState::Stalled, abandon_cutoff)?
        {
            let lock = self.category_lock(&self.category_of(&log_name)?);
            let _guard = lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            self.store.delete_assignment(&log_name, start)?;
            self.store.set_range_state(&log_name, start, JobState::Pending)?;
            warn!(log_name = %log_name, start, "assignment abandoned, range back to pending");
            outcome.reclaimed += 1;
        }
        Ok(outcome)
    }

    fn category_of(&self, log_name: &str) -> Result<String, CoordinatorError> {
        Ok(self
            .store
            .log(log_name)?
            .map(|log| log.category)
            .unwrap_or_default())
    }
}

/// Counts from one reaper sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapOutcome {
    /// RUNNING ranges marked STALLED.
    pub stalled: usize,
    /// STALLED ranges returned to PENDING.
    pub reclaimed: usize,
}
