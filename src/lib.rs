//! Media cluster library.
//!
//! Process supervision and dependency failure isolation for a
//! multi-process media analysis server.

pub mod admin;
pub mod cluster;
pub mod config;
pub mod engines;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod resilience;

pub use cluster::{ClusterHandle, ClusterManager};
pub use config::ServerConfig;
pub use resilience::{CircuitBreakerRegistry, CircuitBreakerConfig};
