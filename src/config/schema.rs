//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::resilience::CircuitBreakerConfig;

/// Environment variable overriding the worker count.
pub const MAX_WORKERS_ENV: &str = "MAX_WORKERS";

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Worker pool supervision.
    pub cluster: ClusterConfig,

    /// Per-worker HTTP service.
    pub worker: WorkerConfig,

    /// Circuit breaker defaults and per-dependency overrides.
    pub breakers: BreakersConfig,

    /// External subprocess engines, keyed by name.
    pub engines: BTreeMap<String, EngineConfig>,

    /// Admin API settings.
    pub admin: AdminConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Worker pool supervision settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Explicit worker count. Defaults to twice the CPU count.
    pub workers: Option<usize>,

    /// Seconds without a metrics report before a worker is recycled.
    pub unresponsive_timeout_secs: u64,

    /// Resident memory ceiling per worker, in bytes.
    pub max_memory_bytes: u64,

    /// Health sweep interval in seconds.
    pub health_check_interval_secs: u64,

    /// Seconds to wait for disconnected workers before force-killing them.
    pub shutdown_grace_secs: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            workers: None,
            unresponsive_timeout_secs: 30,
            max_memory_bytes: 500 * 1024 * 1024,
            health_check_interval_secs: 10,
            shutdown_grace_secs: 10,
        }
    }
}

impl ClusterConfig {
    pub fn unresponsive_timeout(&self) -> Duration {
        Duration::from_secs(self.unresponsive_timeout_secs)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Worker target: `MAX_WORKERS`, then the configured count, then 2 × CPUs.
    pub fn target_workers(&self) -> usize {
        let env = std::env::var(MAX_WORKERS_ENV).ok();
        resolve_worker_count(env.as_deref(), self.workers, num_cpus::get())
    }
}

/// Resolve the worker target from its possible sources.
pub fn resolve_worker_count(env: Option<&str>, configured: Option<usize>, cpus: usize) -> usize {
    if let Some(raw) = env {
        match raw.trim().parse::<usize>() {
            Ok(n) if n > 0 => return n,
            _ => tracing::warn!(value = %raw, "Ignoring invalid {}", MAX_WORKERS_ENV),
        }
    }
    match configured {
        Some(n) if n > 0 => n,
        _ => (cpus * 2).max(1),
    }
}

/// Worker service settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Address every worker binds (shared via SO_REUSEPORT).
    pub bind_address: String,

    /// Seconds between metrics reports to the primary.
    pub metrics_interval_secs: u64,

    /// Request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            metrics_interval_secs: 10,
            request_timeout_secs: 30,
        }
    }
}

impl WorkerConfig {
    pub fn metrics_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Circuit breaker settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct BreakersConfig {
    /// Applied to dependencies without an explicit entry.
    pub defaults: CircuitBreakerConfig,

    /// Per-dependency overrides, registered when a worker starts.
    pub services: BTreeMap<String, CircuitBreakerConfig>,
}

/// How an engine process is driven.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineMode {
    /// A fresh process per request, input path as the last argument.
    #[default]
    Oneshot,
    /// One long-lived process speaking JSON lines on stdin/stdout.
    Persistent,
}

/// An external analysis program.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Program to execute.
    pub command: String,

    /// Arguments. In oneshot mode the input path follows them.
    #[serde(default)]
    pub args: Vec<String>,

    /// Per-request deadline in seconds.
    #[serde(default = "default_engine_timeout")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub mode: EngineMode,

    /// Sent as `config` in the `init` request of a persistent engine.
    #[serde(default = "default_engine_init")]
    pub init: serde_json::Value,
}

fn default_engine_timeout() -> u64 {
    30
}

fn default_engine_init() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            args: Vec::new(),
            timeout_secs: default_engine_timeout(),
            mode: EngineMode::default(),
            init: default_engine_init(),
        }
    }
}

impl EngineConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Primary admin bind address. Workers serve their admin routes on the
    /// worker address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log format ("pretty" or "json").
    pub log_format: String,

    /// Enable the Prometheus endpoint on the primary.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_defaults() {
        let config = ClusterConfig::default();
        assert_eq!(config.unresponsive_timeout(), Duration::from_secs(30));
        assert_eq!(config.max_memory_bytes, 524_288_000);
        assert_eq!(config.health_check_interval(), Duration::from_secs(10));
        assert_eq!(config.shutdown_grace(), Duration::from_secs(10));
    }

    #[test]
    fn worker_count_env_override_wins() {
        assert_eq!(resolve_worker_count(Some("8"), Some(3), 4), 8);
    }

    #[test]
    fn worker_count_falls_back_to_twice_cpus() {
        assert_eq!(resolve_worker_count(None, None, 4), 8);
        assert_eq!(resolve_worker_count(Some("zero"), None, 2), 4);
        assert_eq!(resolve_worker_count(Some("0"), None, 1), 2);
    }

    #[test]
    fn worker_count_uses_configured_value() {
        assert_eq!(resolve_worker_count(None, Some(3), 16), 3);
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let config: ServerConfig = toml::from_str(
            r#"
            [cluster]
            workers = 4

            [breakers.services.audio-analysis]
            failure_threshold_percent = 25
            expected_errors = ["ECONNRESET"]

            [engines.audio-analysis]
            command = "python3"
            args = ["analyzer.py"]
            "#,
        )
        .unwrap();

        assert_eq!(config.cluster.workers, Some(4));
        assert_eq!(config.cluster.shutdown_grace_secs, 10);

        let audio = &config.breakers.services["audio-analysis"];
        assert_eq!(audio.failure_threshold_percent, 25);
        assert_eq!(audio.recovery_timeout_ms, 30_000);
        assert_eq!(audio.expected_errors, vec!["ECONNRESET".to_string()]);

        let engine = &config.engines["audio-analysis"];
        assert_eq!(engine.timeout_secs, 30);
        assert_eq!(engine.args, vec!["analyzer.py".to_string()]);
        assert_eq!(engine.mode, EngineMode::Oneshot);
        assert_eq!(engine.init, serde_json::json!({}));
    }

    #[test]
    fn persistent_engine_with_init_table() {
        let config: ServerConfig = toml::from_str(
            r#"
            [engines.audio]
            command = "python3"
            args = ["audio_emotion_analyzer.py"]
            mode = "persistent"

            [engines.audio.init]
            modelPath = "./models/audio-emotion"
            emotionLabels = ["calm", "happy"]
            "#,
        )
        .unwrap();

        let engine = &config.engines["audio"];
        assert_eq!(engine.mode, EngineMode::Persistent);
        assert_eq!(
            engine.init,
            serde_json::json!({
                "modelPath": "./models/audio-emotion",
                "emotionLabels": ["calm", "happy"],
            })
        );
    }
}
