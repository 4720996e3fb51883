//! certsweep-manager - CT ingestion fleet coordinator.
//!
//! Boot order: logging, store, catalog (upsert + partition), reaper
//! task, HTTP surface. Shutdown is signal-driven and graceful: the
//! listener drains, the reaper task is aborted, SQLite flushes on
//! drop.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use certsweep_manager::cache::DuplicateCache;
use certsweep_manager::catalog;
use certsweep_manager::coordinator::{Coordinator, CoordinatorConfig, DEFAULT_CHUNK_WIDTH};
use certsweep_manager::http::{AppState, router};
use certsweep_manager::store::Store;
use clap::Parser;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// certsweep Manager - coordinates CT log ingestion workers
#[derive(Parser, Debug)]
#[command(name = "certsweep-manager")]
#[command(version, about, long_about = None)]
struct Args {
    /// Listen address for the control API
    #[arg(long, env = "MANAGER_BIND", default_value = "127.0.0.1:8080")]
    bind: SocketAddr,

    /// Path to the SQLite database
    #[arg(long, env = "MANAGER_DB", default_value = "certsweep.db")]
    db: PathBuf,

    /// Path to the CT log catalog (JSON array)
    #[arg(long, env = "MANAGER_CATALOG", default_value = "catalog.json")]
    catalog: PathBuf,

    /// Duplicate cache capacity
    #[arg(long, env = "CACHE_MAX_SIZE", default_value_t = 50_000)]
    cache_max_size: usize,

    /// Width of newly partitioned job ranges
    #[arg(long, default_value_t = DEFAULT_CHUNK_WIDTH)]
    chunk_width: i64,

    /// Seconds without a heartbeat before a running range stalls
    #[arg(long, default_value_t = 300)]
    stale_threshold_secs: u64,

    /// Seconds without a heartbeat before a stalled range is reclaimed
    #[arg(long, default_value_t = 900)]
    abandon_threshold_secs: u64,

    /// Seconds between reaper sweeps
    #[arg(long, default_value_t = 60)]
    reap_interval_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level.clone()));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let store = Store::open(&args.db)
        .with_context(|| format!("failed to open database at {}", args.db.display()))?;

    let coordinator = Coordinator::new(
        store.clone(),
        CoordinatorConfig {
            chunk_width: args.chunk_width,
            stale_threshold: Duration::from_secs(args.stale_threshold_secs),
            abandon_threshold: Duration::from_secs(args.abandon_threshold_secs),
        },
    );

    let entries = catalog::load_catalog(&args.catalog)
        .with_context(|| format!("failed to load catalog {}", args.catalog.display()))?;
    info!(logs = entries.len(), "catalog loaded");
    for entry in entries {
        let log_name = entry.log_name.clone();
        store.upsert_log(&entry.into())?;
        let created = coordinator.ensure_ranges(&log_name)?;
        if created > 0 {
            info!(log_name = %log_name, created, "partitioned job ranges");
        }
    }

    let state = Arc::new(AppState {
        store,
        coordinator,
        cache: DuplicateCache::new(args.cache_max_size),
    });

    let reaper = tokio::spawn(reap_loop(
        Arc::clone(&state),
        Duration::from_secs(args.reap_interval_secs),
    ));

    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;
    info!(bind = %args.bind, "manager listening");

    axum::serve(listener, router(Arc::clone(&state)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")?;

    reaper.abort();
    info!("manager stopped");
    Ok(())
}

/// Periodic stale-assignment sweep.
async fn reap_loop(state: Arc<AppState>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match state.coordinator.reap_stale() {
            Ok(outcome) if outcome.stalled > 0 || outcome.reclaimed > 0 => {
                warn!(
                    stalled = outcome.stalled,
                    reclaimed = outcome.reclaimed,
                    "reaper sweep moved assignments"
                );
            }
            Ok(_) => {}
            Err(err) => error!(error = %err, "reaper sweep failed"),
        }
    }
}

/// Resolves when SIGINT or SIGTERM arrives.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = ctrl_c => info!("SIGINT received, shutting down"),
                _ = sigterm.recv() => info!("SIGTERM received, shutting down"),
            }
        }
        Err(err) => {
            error!(error = %err, "failed to install SIGTERM handler");
            let _ = ctrl_c.await;
            info!("SIGINT received, shutting down");
        }
    }
}
