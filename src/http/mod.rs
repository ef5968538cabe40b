//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! Shared listener (net/listener.rs)
//!     → server.rs (Axum setup, request id, timeout, tracing, in-flight count)
//!     → /analyze/{engine} → EngineSet (breaker-wrapped subprocess)
//!     → response.rs (error → status code)
//! ```

pub mod response;
pub mod server;

pub use server::{AppState, WorkerService};
