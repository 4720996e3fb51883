//! Persistent state backed by `SQLite`.
//!
//! Tables:
//!
//! - `ct_logs`: the catalog, keyed by `log_name`
//! - `job_ranges`: half-open index windows per log, keyed by
//!   `(log_name, start)`
//! - `worker_assignments`: at most one row per job range
//! - `certs`: accepted certificate records, with a UNIQUE index over
//!   the identity 5-tuple backing duplicate suppression
//!
//! All access funnels through one connection behind a mutex; callers
//! above this layer provide whatever coarser serialization they need
//! (the coordinator holds per-category locks across multi-statement
//! selections).

use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use certsweep_core::cert::CertFingerprint;
use rusqlite::{Connection, OptionalExtension, Row, params};
use thiserror::Error;

#[cfg(test)]
mod tests;

/// Lifecycle state of a job range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Unassigned, waiting for a worker.
    Pending,
    /// Assigned with a fresh heartbeat.
    Running,
    /// Assigned but the heartbeat has gone stale.
    Stalled,
    /// Fully fetched (`current == end`).
    Complete,
    /// A worker reported a terminal error for this range.
    Failed,
}

impl JobState {
    /// Lowercase string encoding used in the database.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Stalled => "stalled",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for JobState {
    type Err = StoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "stalled" => Ok(Self::Stalled),
            "complete" => Ok(Self::Complete),
            "failed" => Ok(Self::Failed),
            other => Err(StoreError::BadState(other.to_string())),
        }
    }
}

/// Catalog entry for one CT log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CtLogRow {
    /// Stable unique name.
    pub log_name: String,
    /// Base HTTPS URL.
    pub log_url: String,
    /// Operator category used to cluster worker threads.
    pub category: String,
    /// Current known tree size (exclusive upper bound on indices).
    pub tree_size: i64,
    /// Whether workers should be assigned to this log.
    pub active: bool,
}

/// One job range row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRangeRow {
    /// Owning log.
    pub log_name: String,
    /// First index (inclusive).
    pub start: i64,
    /// End index (exclusive).
    pub end: i64,
    /// Monotonic fetch cursor, `start ..= end`.
    pub current: i64,
    /// Highest index covered by a successful upload, `start - 1` when
    /// nothing has been uploaded yet.
    pub last_uploaded_index: i64,
    /// Lifecycle state.
    pub state: JobState,
}

/// One worker assignment row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentRow {
    /// Assigned log.
    pub log_name: String,
    /// Assigned range start.
    pub start: i64,
    /// Holder.
    pub worker_name: String,
    /// Unix seconds at assignment.
    pub assigned_at: i64,
    /// Unix seconds of the freshest heartbeat.
    pub last_heartbeat_at: i64,
}

/// A certificate record ready for insertion.
#[derive(Debug, Clone)]
pub struct NewCertificate {
    /// Verbatim `get-entries` item as JSON.
    pub ct_entry: String,
    /// Source log URL.
    pub log_url: String,
    /// Source log name.
    pub log_name: String,
    /// Uploading worker.
    pub worker_name: String,
    /// Index within the log.
    pub ct_index: i64,
    /// Worker-reported address, when present.
    pub ip_address: Option<String>,
    /// Identity tuple; also the UNIQUE key.
    pub fingerprint: CertFingerprint,
}

/// Errors surfaced by the store.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// Underlying `SQLite` error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The connection mutex was poisoned by a panicking thread.
    #[error("store connection lock poisoned")]
    Poisoned,

    /// An unknown job state string was read back.
    #[error("unknown job state in database: {0}")]
    BadState(String),
}

/// Whether an error is a UNIQUE/PRIMARY KEY constraint violation, the
/// expected outcome of a racing second insert.
#[must_use]
pub fn is_unique_violation(err: &StoreError) -> bool {
    matches!(
        err,
        StoreError::Sqlite(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// Handle to the Manager database. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Opens (creating if needed) the database at `path` and applies
    /// the schema.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be opened or the schema
    /// DDL fails.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens an in-memory database, for tests.
    ///
    /// # Errors
    ///
    /// Returns an error when the schema DDL fails.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS ct_logs (
                log_name  TEXT PRIMARY KEY,
                log_url   TEXT NOT NULL,
                category  TEXT NOT NULL,
                tree_size INTEGER NOT NULL DEFAULT 0,
                active    INTEGER NOT NULL DEFAULT 1
            );
            CREATE INDEX IF NOT EXISTS idx_ct_logs_category ON ct_logs(category);

            CREATE TABLE IF NOT EXISTS job_ranges (
                log_name            TEXT NOT NULL,
                start               INTEGER NOT NULL,
                "end"               INTEGER NOT NULL,
                current             INTEGER NOT NULL,
                last_uploaded_index INTEGER NOT NULL,
                state               TEXT NOT NULL,
                PRIMARY KEY (log_name, start)
            );
            CREATE INDEX IF NOT EXISTS idx_job_ranges_state ON job_ranges(log_name, state, start);

            CREATE TABLE IF NOT EXISTS worker_assignments (
                log_name          TEXT NOT NULL,
                start             INTEGER NOT NULL,
                worker_name       TEXT NOT NULL,
                assigned_at       INTEGER NOT NULL,
                last_heartbeat_at INTEGER NOT NULL,
                PRIMARY KEY (log_name, start)
            );
            CREATE INDEX IF NOT EXISTS idx_assignments_worker ON worker_assignments(worker_name, log_name);
            CREATE INDEX IF NOT EXISTS idx_assignments_heartbeat ON worker_assignments(last_heartbeat_at);

            CREATE TABLE IF NOT EXISTS certs (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                ct_entry      TEXT NOT NULL,
                log_url       TEXT NOT NULL,
                log_name      TEXT NOT NULL,
                worker_name   TEXT NOT NULL,
                ct_index      INTEGER NOT NULL,
                ip_address    TEXT,
                issuer        TEXT NOT NULL,
                serial_number TEXT NOT NULL,
                not_before    INTEGER NOT NULL,
                not_after     INTEGER NOT NULL,
                common_name   TEXT NOT NULL,
                created_at    INTEGER NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_certs_identity
                ON certs(issuer, serial_number, not_before, not_after, common_name);
            CREATE INDEX IF NOT EXISTS idx_certs_log_name ON certs(log_name);
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    // ---- catalog -------------------------------------------------------

    /// Inserts or refreshes a catalog entry. The tree size never
    /// shrinks through this path.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn upsert_log(&self, log: &CtLogRow) -> Result<(), StoreError> {
        self.conn()?.execute(
            "INSERT INTO ct_logs (log_name, log_url, category, tree_size, active)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(log_name) DO UPDATE SET
                 log_url = excluded.log_url,
                 category = excluded.category,
                 tree_size = MAX(ct_logs.tree_size, excluded.tree_size),
                 active = excluded.active",
            params![
                log.log_name,
                log.log_url,
                log.category,
                log.tree_size,
                i64::from(log.active)
            ],
        )?;
        Ok(())
    }

    /// Looks up one catalog entry.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn log(&self, log_name: &str) -> Result<Option<CtLogRow>, StoreError> {
        self.conn()?
            .query_row(
                "SELECT log_name, log_url, category, tree_size, active
                 FROM ct_logs WHERE log_name = ?1",
                params![log_name],
                log_row,
            )
            .optional()
            .map_err(StoreError::from)
    }

    /// Grows a log's tree size. Returns `false` when the log is
    /// unknown or the new size does not exceed the stored one.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn grow_tree_size(&self, log_name: &str, tree_size: i64) -> Result<bool, StoreError> {
        let changed = self.conn()?.execute(
            "UPDATE ct_logs SET tree_size = ?2 WHERE log_name = ?1 AND tree_size < ?2",
            params![log_name, tree_size],
        )?;
        Ok(changed > 0)
    }

    /// Distinct categories of active logs, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn categories(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT category FROM ct_logs WHERE active = 1 ORDER BY category",
        )?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect::<Result<_, _>>().map_err(StoreError::from)
    }

    /// Active, non-empty logs in a category, in stable name order.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn logs_in_category(&self, category: &str) -> Result<Vec<CtLogRow>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT log_name, log_url, category, tree_size, active
             FROM ct_logs
             WHERE category = ?1 AND active = 1 AND tree_size > 0
             ORDER BY log_name",
        )?;
        let rows = stmt.query_map(params![category], log_row)?;
        rows.collect::<Result<_, _>>().map_err(StoreError::from)
    }

    // ---- job ranges ----------------------------------------------------

    /// Highest `end` across a log's ranges, or `None` when the log has
    /// no ranges yet.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn max_range_end(&self, log_name: &str) -> Result<Option<i64>, StoreError> {
        self.conn()?
            .query_row(
                r#"SELECT MAX("end") FROM job_ranges WHERE log_name = ?1"#,
                params![log_name],
                |row| row.get::<_, Option<i64>>(0),
            )
            .map_err(StoreError::from)
    }

    /// Inserts a fresh range.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure, including an overlapping
    /// primary key.
    pub fn insert_range(&self, range: &JobRangeRow) -> Result<(), StoreError> {
        self.conn()?.execute(
            r#"INSERT INTO job_ranges (log_name, start, "end", current, last_uploaded_index, state)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
            params![
                range.log_name,
                range.start,
                range.end,
                range.current,
                range.last_uploaded_index,
                range.state.as_str()
            ],
        )?;
        Ok(())
    }

    /// Looks up a range by its identifying `(log_name, start)`.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure or a corrupt state string.
    pub fn range(&self, log_name: &str, start: i64) -> Result<Option<JobRangeRow>, StoreError> {
        let row = self
            .conn()?
            .query_row(
                r#"SELECT log_name, start, "end", current, last_uploaded_index, state
                   FROM job_ranges WHERE log_name = ?1 AND start = ?2"#,
                params![log_name, start],
                raw_range_row,
            )
            .optional()?;
        row.map(TryInto::try_into).transpose()
    }

    /// The pending range with the smallest `start` for a log.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure or a corrupt state string.
    pub fn pending_range(&self, log_name: &str) -> Result<Option<JobRangeRow>, StoreError> {
        let row = self
            .conn()?
            .query_row(
                r#"SELECT log_name, start, "end", current, last_uploaded_index, state
                   FROM job_ranges
                   WHERE log_name = ?1 AND state = 'pending'
                   ORDER BY start ASC LIMIT 1"#,
                params![log_name],
                raw_range_row,
            )
            .optional()?;
        row.map(TryInto::try_into).transpose()
    }

    /// Stalled ranges in a category joined with their assignments,
    /// oldest heartbeat first.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure or a corrupt state string.
    pub fn stalled_ranges(
        &self,
        category: &str,
    ) -> Result<Vec<(JobRangeRow, AssignmentRow)>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT r.log_name, r.start, r."end", r.current, r.last_uploaded_index, r.state,
                      a.worker_name, a.assigned_at, a.last_heartbeat_at
               FROM job_ranges r
               JOIN worker_assignments a ON a.log_name = r.log_name AND a.start = r.start
               JOIN ct_logs l ON l.log_name = r.log_name
               WHERE l.category = ?1 AND l.active = 1 AND r.state = 'stalled'
               ORDER BY a.last_heartbeat_at ASC"#,
        )?;
        let rows = stmt.query_map(params![category], |row| {
            Ok((raw_range_row(row)?, assignment_from_range_join(row)?))
        })?;
        let mut out = Vec::new();
        for item in rows {
            let (raw, assignment) = item?;
            out.push((raw.try_into()?, assignment));
        }
        Ok(out)
    }

    /// Sets a range's lifecycle state.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn set_range_state(
        &self,
        log_name: &str,
        start: i64,
        state: JobState,
    ) -> Result<(), StoreError> {
        self.conn()?.execute(
            "UPDATE job_ranges SET state = ?3 WHERE log_name = ?1 AND start = ?2",
            params![log_name, start, state.as_str()],
        )?;
        Ok(())
    }

    /// Advances a range's cursor, forward-only and clamped into
    /// `start ..= end`; the uploaded watermark additionally never
    /// passes `current`.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn advance_cursor(
        &self,
        log_name: &str,
        start: i64,
        current: i64,
        last_uploaded_index: Option<i64>,
    ) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            r#"UPDATE job_ranges
               SET current = MIN(MAX(current, ?3), "end")
               WHERE log_name = ?1 AND start = ?2"#,
            params![log_name, start, current],
        )?;
        if let Some(uploaded) = last_uploaded_index {
            conn.execute(
                "UPDATE job_ranges
                 SET last_uploaded_index = MIN(MAX(last_uploaded_index, ?3), current)
                 WHERE log_name = ?1 AND start = ?2",
                params![log_name, start, uploaded],
            )?;
        }
        Ok(())
    }

    /// Ranges in `state` whose assignment heartbeat is older than
    /// `cutoff`, as `(log_name, start)` pairs.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn ranges_with_stale_heartbeat(
        &self,
        state: JobState,
        cutoff: i64,
    ) -> Result<Vec<(String, i64)>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT r.log_name, r.start
             FROM job_ranges r
             JOIN worker_assignments a ON a.log_name = r.log_name AND a.start = r.start
             WHERE r.state = ?1 AND a.last_heartbeat_at < ?2",
        )?;
        let rows = stmt.query_map(params![state.as_str(), cutoff], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?;
        rows.collect::<Result<_, _>>().map_err(StoreError::from)
    }

    // ---- assignments ---------------------------------------------------

    /// Looks up the assignment for a range.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn assignment(
        &self,
        log_name: &str,
        start: i64,
    ) -> Result<Option<AssignmentRow>, StoreError> {
        self.conn()?
            .query_row(
                "SELECT log_name, start, worker_name, assigned_at, last_heartbeat_at
                 FROM worker_assignments WHERE log_name = ?1 AND start = ?2",
                params![log_name, start],
                |row| {
                    Ok(AssignmentRow {
                        log_name: row.get(0)?,
                        start: row.get(1)?,
                        worker_name: row.get(2)?,
                        assigned_at: row.get(3)?,
                        last_heartbeat_at: row.get(4)?,
                    })
                },
            )
            .optional()
            .map_err(StoreError::from)
    }

    /// Whether a worker already holds an assignment on a log
    /// (policy: one assignment per worker per log).
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn worker_holds_log(&self, worker_name: &str, log_name: &str) -> Result<bool, StoreError> {
        let count: i64 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM worker_assignments WHERE worker_name = ?1 AND log_name = ?2",
            params![worker_name, log_name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Writes (or replaces) the assignment for a range.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn put_assignment(&self, assignment: &AssignmentRow) -> Result<(), StoreError> {
        self.conn()?.execute(
            "INSERT OR REPLACE INTO worker_assignments
                 (log_name, start, worker_name, assigned_at, last_heartbeat_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                assignment.log_name,
                assignment.start,
                assignment.worker_name,
                assignment.assigned_at,
                assignment.last_heartbeat_at
            ],
        )?;
        Ok(())
    }

    /// Refreshes an assignment's heartbeat timestamp.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn touch_assignment(&self, log_name: &str, start: i64, now: i64) -> Result<(), StoreError> {
        self.conn()?.execute(
            "UPDATE worker_assignments SET last_heartbeat_at = ?3
             WHERE log_name = ?1 AND start = ?2",
            params![log_name, start, now],
        )?;
        Ok(())
    }

    /// Removes the assignment for a range, if any.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn delete_assignment(&self, log_name: &str, start: i64) -> Result<(), StoreError> {
        self.conn()?.execute(
            "DELETE FROM worker_assignments WHERE log_name = ?1 AND start = ?2",
            params![log_name, start],
        )?;
        Ok(())
    }

    // ---- certificates --------------------------------------------------

    /// Inserts a batch of certificates in one transaction. Rolls back
    /// entirely on the first failure.
    ///
    /// # Errors
    ///
    /// Returns the first insert error; unique violations surface here
    /// so the caller can fall back to per-record inserts.
    pub fn insert_certs_bulk(
        &self,
        certs: &[NewCertificate],
        created_at: i64,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for cert in certs {
            insert_cert_stmt(&tx, cert, created_at)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Inserts a single certificate.
    ///
    /// # Errors
    ///
    /// Returns the insert error; check with [`is_unique_violation`].
    pub fn insert_cert(&self, cert: &NewCertificate, created_at: i64) -> Result<(), StoreError> {
        let conn = self.conn()?;
        insert_cert_stmt(&conn, cert, created_at)
    }

    /// Number of persisted certificates.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn cert_count(&self) -> Result<i64, StoreError> {
        self.conn()?
            .query_row("SELECT COUNT(*) FROM certs", [], |row| row.get(0))
            .map_err(StoreError::from)
    }
}

fn insert_cert_stmt(conn: &Connection, cert: &NewCertificate, created_at: i64) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO certs (ct_entry, log_url, log_name, worker_name, ct_index, ip_address,
                            issuer, serial_number, not_before, not_after, common_name, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            cert.ct_entry,
            cert.log_url,
            cert.log_name,
            cert.worker_name,
            cert.ct_index,
            cert.ip_address,
            cert.fingerprint.issuer,
            cert.fingerprint.serial_number,
            cert.fingerprint.not_before,
            cert.fingerprint.not_after,
            cert.fingerprint.common_name,
            created_at
        ],
    )?;
    Ok(())
}

/// Intermediate row shape carrying the state as a string.
struct RawRangeRow {
    log_name: String,
    start: i64,
    end: i64,
    current: i64,
    last_uploaded_index: i64,
    state: String,
}

impl TryFrom<RawRangeRow> for JobRangeRow {
    type Error = StoreError;

    fn try_from(raw: RawRangeRow) -> Result<Self, StoreError> {
        Ok(Self {
            log_name: raw.log_name,
            start: raw.start,
            end: raw.end,
            current: raw.current,
            last_uploaded_index: raw.last_uploaded_index,
            state: raw.state.parse()?,
        })
    }
}

fn raw_range_row(row: &Row<'_>) -> rusqlite::Result<RawRangeRow> {
    Ok(RawRangeRow {
        log_name: row.get(0)?,
        start: row.get(1)?,
        end: row.get(2)?,
        current: row.get(3)?,
        last_uploaded_index: row.get(4)?,
        state: row.get(5)?,
    })
}

fn assignment_from_range_join(row: &Row<'_>) -> rusqlite::Result<AssignmentRow> {
    Ok(AssignmentRow {
        log_name: row.get(0)?,
        start: row.get(1)?,
        worker_name: row.get(6)?,
        assigned_at: row.get(7)?,
        last_heartbeat_at: row.get(8)?,
    })
}

fn log_row(row: &Row<'_>) -> rusqlite::Result<CtLogRow> {
    Ok(CtLogRow {
        log_name: row.get(0)?,
        log_url: row.get(1)?,
        category: row.get(2)?,
        tree_size: row.get(3)?,
        active: row.get::<_, i64>(4)? != 0,
    })
}
