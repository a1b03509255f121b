//! # Slicer Scheduler
//!
//! Standalone process running the slicing-job scheduler, the stale-job
//! sweep, and the worker health prober against a PostgreSQL store.
//!
//! ## Usage
//!
//! ```bash
//! DATABASE_URL=postgres://localhost/slicer cargo run --bin slicer-scheduler
//!
//! # Production logging and config overlay
//! SLICER_ENV=production cargo run --release --bin slicer-scheduler
//! ```

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};

use slicer_fleet::config::ConfigManager;
use slicer_fleet::fleet::HttpWorkerClient;
use slicer_fleet::logging;
use slicer_fleet::orchestration::FleetOrchestrator;
use slicer_fleet::store::PgStore;

const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_structured_logging();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        build_mode = if cfg!(debug_assertions) { "debug" } else { "release" },
        "Starting slicer scheduler"
    );

    let manager = ConfigManager::load().context("Failed to load configuration")?;
    let config = manager.config().clone();
    info!(
        environment = manager.environment(),
        config_directory = %manager.config_directory().display(),
        "Configuration loaded"
    );

    let store = PgStore::connect(&config.database)
        .await
        .context("Failed to connect to database")?;
    store
        .run_migrations()
        .await
        .context("Failed to apply migrations")?;

    let client = HttpWorkerClient::new(&config.health, &config.worker_client)
        .context("Failed to build worker client")?;

    let orchestrator = FleetOrchestrator::new(config, Arc::new(store), Arc::new(client));
    orchestrator
        .start()
        .await
        .context("Failed to start fleet orchestrator")?;

    let stats = orchestrator.fleet_statistics();
    info!(
        total_workers = stats.total_workers,
        healthy_workers = stats.healthy_workers,
        "Slicer scheduler running, press Ctrl+C to shut down"
    );

    shutdown_signal().await;
    info!("Shutdown signal received, draining in-flight jobs");

    match orchestrator.stop(SHUTDOWN_DRAIN_TIMEOUT).await {
        Ok(true) => info!("Slicer scheduler shutdown complete"),
        Ok(false) => info!("Slicer scheduler shut down with jobs still in flight; the stale sweep will recover them"),
        Err(e) => error!(error = %e, "Failed to stop orchestrator cleanly"),
    }

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
