//! media-cluster
//!
//! Supervised multi-process media analysis server.
//!
//! # Architecture Overview
//!
//! ```text
//!   media-cluster (primary)
//!   ┌──────────────────────────────────────────────┐
//!   │ ClusterManager ── health sweep ── admin API  │
//!   └───────┬──────────────┬──────────────┬────────┘
//!       spawn/exit     metrics (stdout JSON lines)
//!           ▼              ▼              ▼
//!      ┌─────────┐    ┌─────────┐    ┌─────────┐
//!      │ worker  │    │ worker  │    │ worker  │   shared port (SO_REUSEPORT)
//!      │ HTTP    │    │ HTTP    │    │ HTTP    │
//!      │ engines │    │ engines │    │ engines │   each engine behind a breaker
//!      └─────────┘    └─────────┘    └─────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use media_cluster::cluster::WorkerRole;
use media_cluster::lifecycle::startup;
use media_cluster::observability::logging::{init_logging, LogTarget};

#[derive(Parser)]
#[command(name = "media-cluster")]
#[command(about = "Supervised multi-process media analysis server", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "MEDIA_CLUSTER_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let role = WorkerRole::from_env();

    let code = match run(cli, role).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "Fatal error");
            eprintln!("media-cluster: {}", e);
            1
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli, role: WorkerRole) -> Result<i32, Box<dyn std::error::Error>> {
    let config = startup::load(cli.config.as_deref())?;

    // Worker stdout is the metrics channel to the primary.
    let target = if role.is_worker() {
        LogTarget::Stderr
    } else {
        LogTarget::Stdout
    };
    init_logging(&config.observability, target);

    match role {
        WorkerRole::Primary => {
            tracing::info!(version = env!("CARGO_PKG_VERSION"), "media-cluster primary starting");
            startup::run_primary(config).await
        }
        WorkerRole::Worker { id } => {
            tracing::info!(worker_id = ?id, "media-cluster worker starting");
            Ok(startup::run_worker_role(config).await)
        }
    }
}
