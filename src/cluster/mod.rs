//! Worker pool supervision.
//!
//! # Data Flow
//! ```text
//! Primary:
//!     ClusterManager::initialize
//!     → WorkerSpawner::spawn (re-exec current binary in worker role)
//!     → WorkerEvent stream (metrics messages, exits)
//!     → WorkerRecord map → health sweep → terminate
//!     → exit of a non-disconnecting worker → one replacement
//!
//! Worker:
//!     run_worker → server start factory (once)
//!     → periodic MetricsReport on stdout
//! ```
//!
//! # Design Decisions
//! - All supervision state lives in one task; no shared locks
//! - Only the health sweep terminates workers during normal operation
//! - Replacement happens on exit, never on recycle

pub mod manager;
pub mod message;
pub mod process;
pub mod record;
pub mod spawner;
pub mod worker;

pub use manager::{ClusterHandle, ClusterManager, ShutdownOutcome};
pub use message::{MetricsReport, WorkerMessage};
pub use process::{WorkerEvent, WorkerId, WorkerProcess, WorkerSpawner};
pub use record::{ClusterMetrics, WorkerRecord};
pub use spawner::OsProcessSpawner;
pub use worker::{run_worker, WorkerRole};

/// Error type for cluster operations.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("Failed to spawn worker: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("Cannot locate current executable: {0}")]
    CurrentExe(#[source] std::io::Error),
    #[error("Cluster manager is not running")]
    ManagerGone,
}
