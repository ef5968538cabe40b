//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters, gauges)
//!
//! Consumers:
//!     → Log aggregation (stdout on the primary, stderr on workers)
//!     → Metrics endpoint (Prometheus scrape, primary only)
//! ```

pub mod logging;
pub mod metrics;
