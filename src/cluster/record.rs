//! Primary-side bookkeeping for supervised workers.

use serde::Serialize;
use tokio::time::Instant;

use crate::cluster::message::MetricsReport;
use crate::cluster::process::WorkerId;

/// Last known state of one live worker process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerRecord {
    pub worker_id: WorkerId,
    pub pid: u32,
    pub connections: u64,
    pub memory_usage_bytes: u64,
    pub cpu_usage_micros: u64,
    pub last_health_check: Instant,
}

impl WorkerRecord {
    /// Fresh record for a just-spawned worker.
    pub fn new(worker_id: WorkerId, pid: u32, now: Instant) -> Self {
        Self {
            worker_id,
            pid,
            connections: 0,
            memory_usage_bytes: 0,
            cpu_usage_micros: 0,
            last_health_check: now,
        }
    }

    /// Apply a metrics report received at `now`.
    pub fn apply(&mut self, report: &MetricsReport, now: Instant) {
        self.connections = report.connections;
        self.memory_usage_bytes = report.memory_usage;
        self.cpu_usage_micros = report.cpu_usage;
        self.last_health_check = now;
    }
}

/// Aggregate over all worker records. Computed on demand.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClusterMetrics {
    pub total_workers: usize,
    pub total_connections: u64,
    pub total_memory_bytes: u64,
    pub total_cpu_micros: u64,
}

impl ClusterMetrics {
    pub fn aggregate<'a>(records: impl IntoIterator<Item = &'a WorkerRecord>) -> Self {
        records.into_iter().fold(Self::default(), |mut acc, record| {
            acc.total_workers += 1;
            acc.total_connections += record.connections;
            acc.total_memory_bytes += record.memory_usage_bytes;
            acc.total_cpu_micros += record.cpu_usage_micros;
            acc
        })
    }
}
