//! Startup orchestration.
//!
//! # Responsibilities
//! - Load and validate configuration
//! - Primary: start the cluster manager, admin API and metrics exporter,
//!   then wait for a shutdown signal
//! - Worker: start the HTTP service once and report metrics upward
//!
//! # Design Decisions
//! - Fail fast: a bad config is fatal in either role
//! - The primary binds and installs everything before spawning workers
//! - The exit code is the only result a role returns

use std::error::Error;
use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;

use tokio::net::TcpListener;

use crate::admin::{self, auth::ApiKey};
use crate::cluster::worker::StdoutSink;
use crate::cluster::{run_worker, ClusterManager, OsProcessSpawner, WorkerSpawner};
use crate::config::{load_config, ConfigError, ServerConfig};
use crate::http::WorkerService;
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::signals::{wait_for_shutdown_signal, ShutdownSignal, ShutdownSignals};
use crate::observability::metrics;

/// Load the config file, or defaults when no path is given.
pub fn load(path: Option<&Path>) -> Result<ServerConfig, ConfigError> {
    match path {
        Some(path) => {
            let config = load_config(path)?;
            tracing::info!(path = %path.display(), "Configuration loaded");
            Ok(config)
        }
        None => {
            tracing::info!("No configuration file given, using defaults");
            Ok(ServerConfig::default())
        }
    }
}

/// Run the primary role until SIGTERM or SIGINT. Returns the process exit code.
pub async fn run_primary(config: ServerConfig) -> Result<i32, Box<dyn Error>> {
    let signals = ShutdownSignals::install()?;
    let spawner = OsProcessSpawner::current_exe()?;
    run_primary_until(config, spawner, signals.recv()).await
}

/// Run the primary with `spawner` until `stop` resolves.
///
/// Every fallible setup step runs before the first worker is spawned. Once
/// the pool is up, the only way out is the two-phase shutdown.
pub async fn run_primary_until<S, F>(
    config: ServerConfig,
    spawner: S,
    stop: F,
) -> Result<i32, Box<dyn Error>>
where
    S: WorkerSpawner + 'static,
    F: Future<Output = ShutdownSignal>,
{
    let metrics_addr = if config.observability.metrics_enabled {
        Some(config.observability.metrics_address.parse::<SocketAddr>()?)
    } else {
        None
    };

    let admin_listener = if config.admin.enabled {
        let listener = TcpListener::bind(&config.admin.bind_address).await?;
        tracing::info!(address = %listener.local_addr()?, "Admin API listening");
        Some(listener)
    } else {
        None
    };

    if let Some(addr) = metrics_addr {
        metrics::init_metrics(addr);
    }

    let manager = ClusterManager::new(config.cluster.clone(), spawner);
    let (cluster, supervisor) = manager.start();

    let shutdown = Shutdown::new();
    if let Some(listener) = admin_listener {
        let app = admin::primary_router(cluster.clone(), ApiKey::new(&config.admin.api_key));
        let signalled = shutdown.signalled();
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(signalled).await {
                tracing::error!(error = %e, "Admin API failed");
            }
        });
    }

    let signal = stop.await;
    tracing::info!(%signal, "Stopping worker pool");
    cluster.shutdown().await?;
    let outcome = supervisor.await?;
    shutdown.trigger();

    tracing::info!(?outcome, "Primary stopped");
    Ok(outcome.exit_code())
}

/// Run the worker role until its server stops. Returns the process exit code.
pub async fn run_worker_role(config: ServerConfig) -> i32 {
    let shutdown = Shutdown::new();
    let signalled = shutdown.signalled();

    let trigger = shutdown.clone();
    tokio::spawn(async move {
        match wait_for_shutdown_signal().await {
            Ok(_) => trigger.trigger(),
            Err(e) => tracing::error!(error = %e, "Failed to install signal handlers"),
        }
    });

    let interval = config.worker.metrics_interval();
    let service = WorkerService::new(config);
    run_worker(|| service.start(signalled), interval, StdoutSink).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_path() {
        let config = load(None).unwrap();
        assert_eq!(config.worker.bind_address, "0.0.0.0:8080");
    }
}
