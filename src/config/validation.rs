//! Configuration validation.
//!
//! Serde handles syntax; this checks value ranges and cross-field rules.
//! All problems are reported together, not just the first.

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::ServerConfig;
use crate::resilience::CircuitBreakerConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let cluster = &config.cluster;
    if cluster.workers == Some(0) {
        errors.push(ValidationError::new("cluster.workers", "must be at least 1"));
    }
    for (field, value) in [
        ("cluster.unresponsive_timeout_secs", cluster.unresponsive_timeout_secs),
        ("cluster.health_check_interval_secs", cluster.health_check_interval_secs),
        ("cluster.max_memory_bytes", cluster.max_memory_bytes),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be greater than 0"));
        }
    }

    if config.worker.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new("worker.bind_address", "not a socket address"));
    }
    if config.worker.metrics_interval_secs == 0 {
        errors.push(ValidationError::new("worker.metrics_interval_secs", "must be greater than 0"));
    }
    if config.worker.metrics_interval_secs >= cluster.unresponsive_timeout_secs {
        errors.push(ValidationError::new(
            "worker.metrics_interval_secs",
            "must be shorter than cluster.unresponsive_timeout_secs",
        ));
    }
    if config.worker.request_timeout_secs == 0 {
        errors.push(ValidationError::new("worker.request_timeout_secs", "must be greater than 0"));
    }

    validate_breaker("breakers.defaults", &config.breakers.defaults, &mut errors);
    for (name, breaker) in &config.breakers.services {
        validate_breaker(&format!("breakers.services.{}", name), breaker, &mut errors);
    }

    for (name, engine) in &config.engines {
        if engine.command.trim().is_empty() {
            errors.push(ValidationError::new(format!("engines.{}.command", name), "must not be empty"));
        }
        if engine.timeout_secs == 0 {
            errors.push(ValidationError::new(
                format!("engines.{}.timeout_secs", name),
                "must be greater than 0",
            ));
        }
    }

    if config.admin.enabled {
        if config.admin.api_key.is_empty() {
            errors.push(ValidationError::new("admin.api_key", "must not be empty"));
        }
        if config.admin.bind_address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::new("admin.bind_address", "not a socket address"));
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new("observability.metrics_address", "not a socket address"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_breaker(prefix: &str, config: &CircuitBreakerConfig, errors: &mut Vec<ValidationError>) {
    if config.failure_threshold_percent == 0 || config.failure_threshold_percent > 100 {
        errors.push(ValidationError::new(
            format!("{}.failure_threshold_percent", prefix),
            "must be between 1 and 100",
        ));
    }
    if config.recovery_timeout_ms == 0 {
        errors.push(ValidationError::new(format!("{}.recovery_timeout_ms", prefix), "must be greater than 0"));
    }
    if config.monitoring_period_ms == 0 {
        errors.push(ValidationError::new(format!("{}.monitoring_period_ms", prefix), "must be greater than 0"));
    }
    if config.success_threshold == 0 {
        errors.push(ValidationError::new(format!("{}.success_threshold", prefix), "must be at least 1"));
    }
    if config.expected_errors.iter().any(|e| e.is_empty()) {
        errors.push(ValidationError::new(
            format!("{}.expected_errors", prefix),
            "entries must not be empty",
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::EngineConfig;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(validate_config(&ServerConfig::default()), Ok(()));
    }

    #[test]
    fn collects_every_error() {
        let mut config = ServerConfig::default();
        config.cluster.workers = Some(0);
        config.worker.bind_address = "nowhere".into();
        config.breakers.defaults.failure_threshold_percent = 150;
        config.engines.insert(
            "face".into(),
            EngineConfig {
                command: " ".into(),
                timeout_secs: 5,
                ..EngineConfig::default()
            },
        );

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "cluster.workers",
                "worker.bind_address",
                "breakers.defaults.failure_threshold_percent",
                "engines.face.command",
            ]
        );
    }

    #[test]
    fn metrics_interval_must_beat_unresponsive_timeout() {
        let mut config = ServerConfig::default();
        config.worker.metrics_interval_secs = 30;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "worker.metrics_interval_secs");
    }

    #[test]
    fn rejects_empty_expected_error() {
        let mut config = ServerConfig::default();
        config
            .breakers
            .services
            .insert("cache".into(), CircuitBreakerConfig {
                expected_errors: vec![String::new()],
                ..Default::default()
            });
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "breakers.services.cache.expected_errors");
    }
}
