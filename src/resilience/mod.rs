//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! External call from a worker (ML engine, relay, cache):
//!     → registry.rs (look up or lazily create the named breaker)
//!     → circuit_breaker.rs (admit or reject, then record the outcome)
//!     → timeouts.rs (deadline around the call itself)
//! ```
//!
//! # Design Decisions
//! - One breaker per dependency name, owned by a registry instance
//! - Rejections are a distinct error; the breaker never retries
//! - All breaker timing goes through clock.rs

pub mod circuit_breaker;
pub mod clock;
pub mod registry;
pub mod timeouts;

pub use circuit_breaker::{
    BreakerError, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerState, CircuitBreakerStats,
};
pub use clock::{Clock, ManualClock, TokioClock};
pub use registry::CircuitBreakerRegistry;
