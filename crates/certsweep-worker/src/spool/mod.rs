//! Local failed-upload spool.
//!
//! When an upload is rejected or the Manager is unreachable, the batch
//! is written verbatim to `<spool_dir>/upload_failure_<ts>_<rand>.json`
//! and the fetch loop moves on. A reaper thread replays spool files at
//! startup and on a fixed cadence, deleting each file once the Manager
//! accepts it. Filenames carry a random suffix so concurrent threads
//! never need to coordinate writes.
//!
//! Upload ingestion on the Manager side is idempotent, which is what
//! makes the unordered, at-least-once replay here safe.

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use certsweep_core::protocol::UploadItem;
use chrono::Utc;
use rand::Rng;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::client::ManagerClient;
use crate::shutdown::sleep_unless_stopped;

#[cfg(test)]
mod tests;

/// Spool filename prefix.
const FILE_PREFIX: &str = "upload_failure_";

/// Errors reading or writing spool files.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SpoolError {
    /// Filesystem failure.
    #[error("spool io error: {0}")]
    Io(#[from] std::io::Error),

    /// A spool file did not contain an upload batch.
    #[error("spool file is not an upload batch: {0}")]
    Json(#[from] serde_json::Error),
}

/// Handle to the spool directory.
#[derive(Debug, Clone)]
pub struct Spool {
    dir: PathBuf,
}

impl Spool {
    /// Creates a handle; the directory is created on first write.
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// The spool directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persists a batch, returning the file it landed in.
    ///
    /// # Errors
    ///
    /// Returns [`SpoolError`] when the directory cannot be created or
    /// the file cannot be written. Callers treat that as fatal: a
    /// worker that can neither upload nor spool is losing data.
    pub fn save(&self, items: &[UploadItem]) -> Result<PathBuf, SpoolError> {
        std::fs::create_dir_all(&self.dir)?;
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        let suffix: u32 = rand::thread_rng().gen();
        let path = self
            .dir
            .join(format!("{FILE_PREFIX}{timestamp}_{suffix:08x}.json"));
        std::fs::write(&path, serde_json::to_vec_pretty(items)?)?;
        debug!(path = %path.display(), records = items.len(), "batch spooled");
        Ok(path)
    }

    /// Spool files currently on disk, oldest name first.
    ///
    /// # Errors
    ///
    /// Returns [`SpoolError`] when the directory cannot be listed. A
    /// missing directory reads as empty.
    pub fn scan(&self) -> Result<Vec<PathBuf>, SpoolError> {
        let mut files = Vec::new();
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(files),
            Err(err) => return Err(err.into()),
        };
        for entry in entries {
            let path = entry?.path();
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if name.starts_with(FILE_PREFIX) && name.ends_with(".json") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Reads a spool file back into a batch.
    ///
    /// # Errors
    ///
    /// Returns [`SpoolError`] when the file is unreadable or not a
    /// JSON upload batch.
    pub fn load(&self, path: &Path) -> Result<Vec<UploadItem>, SpoolError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Deletes a spool file after a successful re-upload.
    ///
    /// # Errors
    ///
    /// Returns [`SpoolError`] on filesystem failure.
    pub fn remove(&self, path: &Path) -> Result<(), SpoolError> {
        std::fs::remove_file(path)?;
        Ok(())
    }

    /// One retry pass: replays every readable spool file and removes
    /// the ones the Manager accepted. Unreadable files are skipped
    /// with a warning, never deleted. Returns how many files drained.
    pub fn drain_once(&self, manager: &ManagerClient) -> usize {
        let files = match self.scan() {
            Ok(files) => files,
            Err(err) => {
                warn!(error = %err, "spool scan failed");
                return 0;
            }
        };
        let mut drained = 0;
        for path in files {
            let items = match self.load(&path) {
                Ok(items) => items,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping unreadable spool file");
                    continue;
                }
            };
            match manager.upload(&items) {
                Ok(response) => {
                    info!(
                        path = %path.display(),
                        inserted = response.inserted,
                        duplicates = response.duplicates,
                        failures = response.failures,
                        "spooled batch re-uploaded"
                    );
                    if let Err(err) = self.remove(&path) {
                        warn!(path = %path.display(), error = %err, "failed to remove drained spool file");
                    } else {
                        drained += 1;
                    }
                }
                Err(err) => {
                    debug!(path = %path.display(), error = %err, "spool re-upload failed, keeping file");
                }
            }
        }
        drained
    }
}

/// Reaper thread body: drain at startup, then on every interval tick,
/// until the stop flag is raised.
pub fn run_reaper(
    spool: &Spool,
    manager: &ManagerClient,
    stop: &AtomicBool,
    interval: std::time::Duration,
) {
    info!(dir = %spool.dir().display(), "spool reaper started");
    spool.drain_once(manager);
    while sleep_unless_stopped(stop, interval) {
        spool.drain_once(manager);
    }
    info!("spool reaper stopped");
}
