//! Worker-role entry point.
//!
//! A worker starts its server exactly once, then pushes a
//! [`MetricsReport`] to the primary on a fixed interval until the server
//! finishes.

use std::fmt;
use std::future::Future;
use std::io::{self, Write};
use std::time::Duration;

use nix::sys::resource::{getrusage, UsageWho};
use nix::sys::time::TimeValLike;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tokio::task::JoinHandle;
use tokio::time;

use crate::cluster::message::{MetricsReport, WorkerMessage};
use crate::net::ConnectionTracker;

/// Environment variable selecting the process role.
pub const ROLE_ENV: &str = "MEDIA_CLUSTER_ROLE";
/// Environment variable carrying the primary-assigned worker id.
pub const WORKER_ID_ENV: &str = "MEDIA_CLUSTER_WORKER_ID";
/// Value of [`ROLE_ENV`] that selects the worker role.
pub const WORKER_ROLE: &str = "worker";

/// Which side of the cluster this process is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerRole {
    Primary,
    Worker { id: Option<u64> },
}

impl WorkerRole {
    pub fn from_env() -> Self {
        let role = std::env::var(ROLE_ENV).ok();
        let id = std::env::var(WORKER_ID_ENV).ok();
        Self::detect(role.as_deref(), id.as_deref())
    }

    /// Anything other than `worker` means primary.
    pub fn detect(role: Option<&str>, id: Option<&str>) -> Self {
        match role {
            Some(WORKER_ROLE) => Self::Worker {
                id: id.and_then(|raw| raw.parse().ok()),
            },
            _ => Self::Primary,
        }
    }

    pub fn is_worker(&self) -> bool {
        matches!(self, Self::Worker { .. })
    }
}

/// A started worker server.
#[derive(Debug)]
pub struct WorkerServer {
    /// Live in-flight request count.
    pub connections: ConnectionTracker,
    /// Resolves when the server has stopped.
    pub finished: JoinHandle<io::Result<()>>,
}

/// Destination for messages to the primary.
pub trait MetricsSink: Send {
    fn send(&mut self, message: &WorkerMessage) -> io::Result<()>;
}

/// Writes messages as JSON lines on stdout.
#[derive(Debug, Default)]
pub struct StdoutSink;

impl MetricsSink for StdoutSink {
    fn send(&mut self, message: &WorkerMessage) -> io::Result<()> {
        let line = message.to_line()?;
        let mut stdout = io::stdout().lock();
        stdout.write_all(line.as_bytes())?;
        stdout.flush()
    }
}

/// Samples this process's resource usage.
pub struct ProcessSampler {
    system: System,
    pid: Pid,
}

impl ProcessSampler {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            pid: Pid::from_u32(std::process::id()),
        }
    }

    /// Resident memory in bytes, 0 if unavailable.
    pub fn memory_bytes(&mut self) -> u64 {
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[self.pid]),
            false,
            ProcessRefreshKind::nothing().with_memory(),
        );
        self.system.process(self.pid).map(|p| p.memory()).unwrap_or(0)
    }

    /// User plus system CPU time in microseconds, 0 if unavailable.
    pub fn cpu_micros(&self) -> u64 {
        match getrusage(UsageWho::RUSAGE_SELF) {
            Ok(usage) => {
                let micros = usage.user_time().num_microseconds() + usage.system_time().num_microseconds();
                micros.max(0) as u64
            }
            Err(e) => {
                tracing::debug!(error = %e, "getrusage failed");
                0
            }
        }
    }

    pub fn report(&mut self, connections: u64) -> MetricsReport {
        MetricsReport {
            memory_usage: self.memory_bytes(),
            cpu_usage: self.cpu_micros(),
            connections,
        }
    }
}

impl Default for ProcessSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ProcessSampler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessSampler").field("pid", &self.pid).finish()
    }
}

/// Run the worker role. Returns the process exit code.
///
/// `start` is invoked once. If it fails the worker exits with 1. Otherwise
/// metrics are pushed every `interval` until the server finishes, which
/// yields 0 on a clean stop. A closed pipe to the primary also ends the
/// worker, with 1.
pub async fn run_worker<F, Fut, E>(start: F, interval: Duration, mut sink: impl MetricsSink) -> i32
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<WorkerServer, E>>,
    E: fmt::Display,
{
    let mut server = match start().await {
        Ok(server) => server,
        Err(e) => {
            tracing::error!(error = %e, "Worker failed to start");
            return 1;
        }
    };
    tracing::info!(pid = std::process::id(), "Worker started");

    let mut sampler = ProcessSampler::new();
    let mut ticker = time::interval(interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let report = sampler.report(server.connections.active_count());
                match sink.send(&WorkerMessage::Metrics(report)) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                        tracing::error!("Primary is gone, stopping worker");
                        return 1;
                    }
                    Err(e) => tracing::warn!(error = %e, "Failed to report metrics"),
                }
            }
            result = &mut server.finished => {
                return match result {
                    Ok(Ok(())) => {
                        tracing::info!("Worker stopped");
                        0
                    }
                    Ok(Err(e)) => {
                        tracing::error!(error = %e, "Worker server failed");
                        1
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Worker server task panicked");
                        1
                    }
                };
            }
        }
    }
}
