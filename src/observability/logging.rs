//! Structured logging.
//!
//! `RUST_LOG` wins over the configured level. Workers log to stderr because
//! their stdout carries the metrics channel to the primary.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;

/// Where formatted log lines go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
    Stdout,
    Stderr,
}

/// Install the global tracing subscriber.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_logging(config: &ObservabilityConfig, target: LogTarget) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("media_cluster={},tower_http=info", config.log_level)));

    let json = config.log_format.eq_ignore_ascii_case("json");
    let registry = tracing_subscriber::registry().with(filter);

    let result = match (json, target) {
        (true, LogTarget::Stdout) => registry.with(tracing_subscriber::fmt::layer().json()).try_init(),
        (true, LogTarget::Stderr) => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        (false, LogTarget::Stdout) => registry.with(tracing_subscriber::fmt::layer()).try_init(),
        (false, LogTarget::Stderr) => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init(),
    };

    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}
