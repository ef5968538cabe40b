//! Health sweep over worker records.

use std::fmt;

use tokio::time::Instant;

use crate::cluster::process::WorkerId;
use crate::cluster::record::WorkerRecord;
use crate::config::ClusterConfig;

/// Why a worker is being recycled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecycleReason {
    /// No metrics report within the unresponsive timeout.
    Unresponsive,
    /// Reported resident memory above the ceiling.
    MemoryExceeded,
}

impl RecycleReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unresponsive => "unresponsive",
            Self::MemoryExceeded => "memory_exceeded",
        }
    }
}

impl fmt::Display for RecycleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A worker that should receive the termination signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecycleDecision {
    pub worker_id: WorkerId,
    pub pid: u32,
    pub reason: RecycleReason,
}

/// Evaluate every record at `now`.
///
/// Yields at most one decision per worker. Staleness is checked first, so a
/// silent worker is reported as unresponsive even if its last report was
/// also over the memory ceiling.
pub fn evaluate<'a>(
    records: impl IntoIterator<Item = &'a WorkerRecord>,
    now: Instant,
    config: &ClusterConfig,
) -> Vec<RecycleDecision> {
    let timeout = config.unresponsive_timeout();
    records
        .into_iter()
        .filter_map(|record| {
            let silent_for = now.saturating_duration_since(record.last_health_check);
            let reason = if silent_for > timeout {
                RecycleReason::Unresponsive
            } else if record.memory_usage_bytes > config.max_memory_bytes {
                RecycleReason::MemoryExceeded
            } else {
                return None;
            };
            Some(RecycleDecision {
                worker_id: record.worker_id,
                pid: record.pid,
                reason,
            })
        })
        .collect()
}
