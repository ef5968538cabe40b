//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ServerConfig (validated, immutable)
//!     → primary keeps it; each worker re-reads the same file at startup
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - `MAX_WORKERS` in the environment overrides `cluster.workers`

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AdminConfig, BreakersConfig, ClusterConfig, EngineConfig, EngineMode, ObservabilityConfig,
    ServerConfig, WorkerConfig,
};
