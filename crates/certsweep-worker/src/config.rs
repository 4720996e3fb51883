//! Worker configuration.
//!
//! Every operator-facing option is a CLI flag with an environment
//! fallback, so containerized deployments can run flag-less.

use std::path::PathBuf;
use std::time::Duration;

use certsweep_core::identity;
use certsweep_core::protocol::MAX_UPLOAD_BATCH;
use clap::Parser;
use thiserror::Error;

/// certsweep Worker - fetches CT log entries for the fleet
#[derive(Parser, Debug)]
#[command(name = "certsweep-worker")]
#[command(version, about, long_about = None)]
pub struct WorkerArgs {
    /// Base URL of the Manager API
    #[arg(long, env = "MANAGER_URL", default_value = "http://127.0.0.1:8080")]
    pub manager_url: String,

    /// Public worker identity (auto-generated if unset)
    #[arg(long, env = "WORKER_NAME")]
    pub worker_name: Option<String>,

    /// Outbound proxies for CT fetches, comma-separated, rotated per
    /// request
    #[arg(long, env = "PROXIES", value_delimiter = ',')]
    pub proxies: Vec<String>,

    /// Enable verbose logging (or set DEBUG=1/true/yes)
    #[arg(long)]
    pub debug: bool,

    /// Domain suffix filter
    #[arg(long, env = "SUFFIX", default_value = ".jp")]
    pub suffix: String,

    /// Upload batch size (at most 32)
    #[arg(long, env = "BATCH_SIZE", default_value_t = MAX_UPLOAD_BATCH)]
    pub batch_size: usize,

    /// Directory for failed-upload spool files
    #[arg(long, env = "SPOOL_DIR", default_value = "pending/upload_failure")]
    pub spool_dir: PathBuf,

    /// Entries requested per get-entries call (the log may return
    /// fewer)
    #[arg(long, default_value_t = 256)]
    pub fetch_window: i64,

    /// Seconds between progress heartbeats
    #[arg(long, default_value_t = 30)]
    pub heartbeat_interval_secs: u64,

    /// Seconds before a partially filled buffer is flushed
    #[arg(long, default_value_t = 60)]
    pub flush_interval_secs: u64,

    /// Seconds between spool retry scans
    #[arg(long, default_value_t = 300)]
    pub spool_scan_interval_secs: u64,

    /// Cap on category fetch threads (default: one per category)
    #[arg(long)]
    pub threads: Option<usize>,

    /// Log level when --debug is off (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// Configuration failures; these terminate the worker with exit
/// code 1.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The Manager URL is not an HTTP(S) URL.
    #[error("manager url must start with http:// or https://, got {0}")]
    InvalidManagerUrl(String),

    /// Batch size outside `1..=32`.
    #[error("batch size must be between 1 and {MAX_UPLOAD_BATCH}, got {0}")]
    InvalidBatchSize(usize),

    /// The suffix filter is empty after normalization.
    #[error("suffix filter must not be empty")]
    EmptySuffix,

    /// Non-positive fetch window.
    #[error("fetch window must be positive, got {0}")]
    InvalidFetchWindow(i64),

    /// A proxy entry is not an absolute URL.
    #[error("proxy must be an absolute URL, got {0}")]
    InvalidProxy(String),
}

/// Validated worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Manager base URL, without a trailing slash.
    pub manager_url: String,
    /// Resolved worker identity.
    pub worker_name: String,
    /// Outbound proxies for CT fetches.
    pub proxies: Vec<String>,
    /// Normalized suffix (no leading dot).
    pub suffix: String,
    /// Upload batch size.
    pub batch_size: usize,
    /// Spool directory.
    pub spool_dir: PathBuf,
    /// get-entries window.
    pub fetch_window: i64,
    /// Heartbeat cadence.
    pub heartbeat_interval: Duration,
    /// Buffer flush cadence.
    pub flush_interval: Duration,
    /// Spool scan cadence.
    pub spool_scan_interval: Duration,
    /// Cap on category threads.
    pub threads: Option<usize>,
    /// Verbose logging.
    pub debug: bool,
    /// Log level when `debug` is off.
    pub log_level: String,
}

impl TryFrom<WorkerArgs> for WorkerConfig {
    type Error = ConfigError;

    fn try_from(args: WorkerArgs) -> Result<Self, ConfigError> {
        let manager_url = args.manager_url.trim().trim_end_matches('/').to_string();
        if !manager_url.starts_with("http://") && !manager_url.starts_with("https://") {
            return Err(ConfigError::InvalidManagerUrl(args.manager_url));
        }

        if args.batch_size == 0 || args.batch_size > MAX_UPLOAD_BATCH {
            return Err(ConfigError::InvalidBatchSize(args.batch_size));
        }

        let suffix = args.suffix.trim().trim_start_matches('.').to_string();
        if suffix.is_empty() {
            return Err(ConfigError::EmptySuffix);
        }

        if args.fetch_window <= 0 {
            return Err(ConfigError::InvalidFetchWindow(args.fetch_window));
        }

        let proxies: Vec<String> = args
            .proxies
            .iter()
            .map(|proxy| proxy.trim().to_string())
            .filter(|proxy| !proxy.is_empty())
            .collect();
        for proxy in &proxies {
            if !proxy.starts_with("http://") && !proxy.starts_with("https://")
                && !proxy.starts_with("socks5://")
            {
                return Err(ConfigError::InvalidProxy(proxy.clone()));
            }
        }

        Ok(Self {
            manager_url,
            worker_name: identity::resolve_worker_name(args.worker_name.as_deref()),
            proxies,
            suffix,
            batch_size: args.batch_size,
            spool_dir: args.spool_dir,
            fetch_window: args.fetch_window,
            heartbeat_interval: Duration::from_secs(args.heartbeat_interval_secs),
            flush_interval: Duration::from_secs(args.flush_interval_secs),
            spool_scan_interval: Duration::from_secs(args.spool_scan_interval_secs),
            threads: args.threads,
            debug: args.debug || env_debug(),
            log_level: args.log_level,
        })
    }
}

/// `DEBUG=1`, `true`, or `yes` (any case) enables verbose logging.
fn env_debug() -> bool {
    std::env::var("DEBUG").is_ok_and(|value| {
        matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes"
        )
    })
}
