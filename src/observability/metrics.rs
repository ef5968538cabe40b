//! Metrics collection and exposition.
//!
//! # Metrics
//! - `cluster_workers` (gauge): live supervised workers
//! - `cluster_worker_spawns_total` (counter): successful and failed spawns by outcome
//! - `cluster_worker_exits_total` (counter): worker exits by expected=true|false
//! - `cluster_worker_recycles_total` (counter): health-sweep terminations by reason
//! - `circuit_breaker_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `circuit_breaker_calls_total` (counter): completed calls by outcome
//! - `circuit_breaker_rejections_total` (counter): calls rejected while open
//!
//! Without an installed recorder every call here is a no-op, so workers and
//! tests can record freely.

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::resilience::CircuitBreakerState;

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_cluster_size(workers: usize) {
    gauge!("cluster_workers").set(workers as f64);
}

pub fn record_worker_spawn(outcome: &'static str) {
    counter!("cluster_worker_spawns_total", "outcome" => outcome).increment(1);
}

pub fn record_worker_exit(expected: bool) {
    let expected = if expected { "true" } else { "false" };
    counter!("cluster_worker_exits_total", "expected" => expected).increment(1);
}

pub fn record_worker_recycle(reason: &'static str) {
    counter!("cluster_worker_recycles_total", "reason" => reason).increment(1);
}

pub fn record_breaker_state(name: &str, state: CircuitBreakerState) {
    let value = match state {
        CircuitBreakerState::Closed => 0.0,
        CircuitBreakerState::HalfOpen => 1.0,
        CircuitBreakerState::Open => 2.0,
    };
    gauge!("circuit_breaker_state", "breaker" => name.to_string()).set(value);
}

pub fn record_breaker_call(name: &str, outcome: &'static str) {
    counter!(
        "circuit_breaker_calls_total",
        "breaker" => name.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_breaker_rejection(name: &str) {
    counter!("circuit_breaker_rejections_total", "breaker" => name.to_string()).increment(1);
}
