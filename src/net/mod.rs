//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Worker startup
//!     → listener.rs (bind with SO_REUSEPORT, shared by all workers)
//!     → HTTP layer
//!     → connection.rs (per-request guard, live count for metrics)
//! ```

pub mod connection;
pub mod listener;

pub use connection::{ConnectionGuard, ConnectionTracker};
pub use listener::{bind_shared, ListenerError};
