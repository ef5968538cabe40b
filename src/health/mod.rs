//! Worker health evaluation.
//!
//! # Data Flow
//! ```text
//! Worker metrics messages
//!     → WorkerRecord (cluster/record.rs)
//!     → periodic sweep (sweep.rs)
//!     → RecycleDecision per unhealthy worker
//!     → ClusterManager sends the termination signal
//! ```
//!
//! # Design Decisions
//! - Evaluation is pure; the manager owns the timer and the signals
//! - The sweep never spawns; replacements come from exit handling

pub mod sweep;

pub use sweep::{evaluate, RecycleDecision, RecycleReason};
