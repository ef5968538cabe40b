use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use crate::cluster::{ClusterHandle, ClusterMetrics};
use crate::resilience::{CircuitBreakerRegistry, CircuitBreakerState, CircuitBreakerStats};

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub role: &'static str,
    pub status: &'static str,
    pub pid: u32,
}

/// Breaker stats with instants rendered relative to now.
#[derive(Debug, Serialize)]
pub struct BreakerStatus {
    pub state: CircuitBreakerState,
    pub failures: u64,
    pub successes: u64,
    pub last_failure_ms_ago: Option<u64>,
    pub last_success_ms_ago: Option<u64>,
    pub next_attempt_in_ms: Option<u64>,
}

impl BreakerStatus {
    fn from_stats(stats: CircuitBreakerStats, now: tokio::time::Instant) -> Self {
        let ago = |t: tokio::time::Instant| now.saturating_duration_since(t).as_millis() as u64;
        Self {
            state: stats.state,
            failures: stats.failures,
            successes: stats.successes,
            last_failure_ms_ago: stats.last_failure_time.map(ago),
            last_success_ms_ago: stats.last_success_time.map(ago),
            next_attempt_in_ms: stats
                .next_attempt
                .map(|t| t.saturating_duration_since(now).as_millis() as u64),
        }
    }
}

pub async fn get_status() -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        role: "primary",
        status: "operational",
        pid: std::process::id(),
    })
}

pub async fn get_cluster(
    State(cluster): State<ClusterHandle>,
) -> Result<Json<ClusterMetrics>, StatusCode> {
    match cluster.metrics().await {
        Ok(metrics) => Ok(Json(metrics)),
        Err(e) => {
            tracing::warn!(error = %e, "Cluster metrics unavailable");
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

pub async fn list_breakers(
    State(registry): State<Arc<CircuitBreakerRegistry>>,
) -> Json<BTreeMap<String, BreakerStatus>> {
    let now = registry.now();
    Json(
        registry
            .get_status()
            .into_iter()
            .map(|(name, stats)| (name, BreakerStatus::from_stats(stats, now)))
            .collect(),
    )
}

pub async fn reset_all_breakers(State(registry): State<Arc<CircuitBreakerRegistry>>) -> StatusCode {
    registry.reset_all();
    StatusCode::NO_CONTENT
}

pub async fn reset_breaker(
    State(registry): State<Arc<CircuitBreakerRegistry>>,
    Path(name): Path<String>,
) -> StatusCode {
    if registry.reset(&name) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

pub async fn remove_breaker(
    State(registry): State<Arc<CircuitBreakerRegistry>>,
    Path(name): Path<String>,
) -> StatusCode {
    if registry.remove(&name) {
        tracing::info!(breaker = %name, "Circuit breaker removed");
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}
