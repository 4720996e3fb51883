//! certsweep-worker - CT log fetcher.
//!
//! Exit codes: 0 clean shutdown, 1 unrecoverable configuration error,
//! 2 Manager unreachable after the startup retry budget.

use std::process::ExitCode;
use std::thread::JoinHandle;

use certsweep_core::backoff::RetryPolicy;
use certsweep_worker::client::{CtLogClient, ManagerClient};
use certsweep_worker::config::{WorkerArgs, WorkerConfig};
use certsweep_worker::fetch::FetchLoop;
use certsweep_worker::shutdown;
use certsweep_worker::spool::{Spool, run_reaper};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Attempts to reach the Manager before giving up with exit code 2.
const STARTUP_RETRY_BUDGET: u32 = 10;

fn main() -> ExitCode {
    let args = WorkerArgs::parse();
    let level = if args.debug { "debug" } else { &args.log_level };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match WorkerConfig::try_from(args) {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "invalid configuration");
            return ExitCode::from(1);
        }
    };
    info!(
        worker_name = %config.worker_name,
        manager_url = %config.manager_url,
        suffix = %config.suffix,
        "worker starting"
    );

    if let Err(err) = shutdown::install() {
        error!(error = %err, "failed to install signal handlers");
        return ExitCode::from(1);
    }

    let categories = match fetch_categories(&config) {
        Some(categories) => categories,
        None => {
            error!(
                attempts = STARTUP_RETRY_BUDGET,
                "manager unreachable, giving up"
            );
            return ExitCode::from(2);
        }
    };
    if categories.is_empty() {
        warn!("manager reports no active categories; idling until shutdown");
    }

    let serving: Vec<String> = match config.threads {
        Some(cap) => categories.into_iter().take(cap).collect(),
        None => categories,
    };
    info!(categories = ?serving, "spawning fetch threads");

    let stop = shutdown::flag();
    let mut handles: Vec<JoinHandle<()>> = Vec::new();

    for category in serving {
        match build_fetch_loop(&config, category.clone()) {
            Ok(fetch_loop) => {
                let handle = std::thread::Builder::new()
                    .name(format!("fetch-{category}"))
                    .spawn(move || fetch_loop.run());
                match handle {
                    Ok(handle) => handles.push(handle),
                    Err(err) => error!(category = %category, error = %err, "failed to spawn fetch thread"),
                }
            }
            Err(reason) => {
                error!(category = %category, reason, "failed to build fetch loop");
                return ExitCode::from(1);
            }
        }
    }

    // Spool reaper: replays failed uploads until shutdown.
    let reaper_handle = match ManagerClient::new(&config.manager_url, &config.worker_name) {
        Ok(manager) => {
            let spool = Spool::new(config.spool_dir.clone());
            let interval = config.spool_scan_interval;
            std::thread::Builder::new()
                .name("spool-reaper".to_string())
                .spawn(move || run_reaper(&spool, &manager, stop, interval))
                .ok()
        }
        Err(err) => {
            error!(error = %err, "failed to build spool reaper client");
            None
        }
    };

    for handle in handles {
        let _ = handle.join();
    }
    if let Some(handle) = reaper_handle {
        let _ = handle.join();
    }

    if shutdown::fatal() {
        error!("worker stopped after an unrecoverable local failure");
        return ExitCode::from(1);
    }
    info!("worker stopped");
    ExitCode::SUCCESS
}

/// Startup handshake: the category list, with backoff across the
/// retry budget. `None` means the Manager stayed unreachable.
fn fetch_categories(config: &WorkerConfig) -> Option<Vec<String>> {
    let manager = match ManagerClient::new(&config.manager_url, &config.worker_name) {
        Ok(manager) => manager,
        Err(err) => {
            error!(error = %err, "failed to build manager client");
            return None;
        }
    };
    let policy = RetryPolicy::default();
    for attempt in 1..=STARTUP_RETRY_BUDGET {
        match manager.categories() {
            Ok(categories) => return Some(categories),
            Err(err) => {
                warn!(attempt, error = %err, "failed to fetch categories");
                if shutdown::flag().load(std::sync::atomic::Ordering::Acquire) {
                    return None;
                }
                if attempt < STARTUP_RETRY_BUDGET
                    && !shutdown::sleep_unless_stopped(
                        shutdown::flag(),
                        policy.jittered_delay_for_attempt(attempt),
                    )
                {
                    return None;
                }
            }
        }
    }
    None
}

/// Builds the per-thread client set for one category.
fn build_fetch_loop(config: &WorkerConfig, category: String) -> Result<FetchLoop, String> {
    let manager = ManagerClient::new(&config.manager_url, &config.worker_name)
        .map_err(|err| format!("manager client: {err}"))?;
    let ctlog = CtLogClient::new(&config.proxies).map_err(|err| format!("ct client: {err}"))?;
    let spool = Spool::new(config.spool_dir.clone());
    Ok(FetchLoop::new(
        category,
        config.clone(),
        manager,
        ctlog,
        spool,
        shutdown::flag(),
    ))
}
