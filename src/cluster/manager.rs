//! Primary-side supervisor.
//!
//! # Responsibilities
//! - Spawn the target number of workers
//! - Ingest metrics messages into worker records
//! - Replace workers that die unexpectedly
//! - Recycle unresponsive or oversized workers on a periodic sweep
//! - Two-phase shutdown: disconnect, then force-kill after the grace period

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use crate::cluster::message::WorkerMessage;
use crate::cluster::process::{WorkerEvent, WorkerEventSender, WorkerId, WorkerProcess, WorkerSpawner};
use crate::cluster::record::{ClusterMetrics, WorkerRecord};
use crate::cluster::ClusterError;
use crate::config::ClusterConfig;
use crate::health;
use crate::observability::metrics;

/// How shutdown ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every worker exited within the grace period.
    Graceful,
    /// The grace period expired and the remaining workers were killed.
    Forced { killed: usize },
}

impl ShutdownOutcome {
    /// Process exit code for the primary.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Graceful => 0,
            Self::Forced { .. } => 1,
        }
    }
}

#[derive(Debug)]
struct Supervised {
    process: Box<dyn WorkerProcess>,
    /// Set when the primary asked this worker to leave. Its exit is expected.
    disconnecting: bool,
    /// Set when a sweep sent the termination signal.
    recycling: bool,
}

/// Supervises a pool of worker processes.
///
/// Owns all supervision state. Drive it either by calling the methods
/// directly or by handing it to [`ClusterManager::start`], which runs the
/// event loop on its own task.
pub struct ClusterManager<S> {
    config: ClusterConfig,
    spawner: S,
    workers: HashMap<WorkerId, Supervised>,
    records: HashMap<WorkerId, WorkerRecord>,
    events_tx: WorkerEventSender,
    events_rx: mpsc::UnboundedReceiver<WorkerEvent>,
    next_id: u64,
    shutting_down: bool,
}

impl<S: WorkerSpawner> ClusterManager<S> {
    pub fn new(config: ClusterConfig, spawner: S) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            config,
            spawner,
            workers: HashMap::new(),
            records: HashMap::new(),
            events_tx,
            events_rx,
            next_id: 1,
            shutting_down: false,
        }
    }

    /// Spawn the target number of workers.
    ///
    /// Individual spawn failures are logged and skipped; the pool may start
    /// short. Returns the number of workers spawned.
    pub fn initialize(&mut self) -> usize {
        let target = self.config.target_workers();
        tracing::info!(target, "Starting worker pool");

        let spawned = (0..target).filter_map(|_| self.spawn_worker()).count();
        if spawned < target {
            tracing::warn!(target, spawned, "Worker pool started short");
        }
        spawned
    }

    /// Spawn one worker. Failures are logged, never propagated.
    fn spawn_worker(&mut self) -> Option<WorkerId> {
        let id = WorkerId(self.next_id);
        self.next_id += 1;

        match self.spawner.spawn(id, self.events_tx.clone()) {
            Ok(process) => {
                match process.pid() {
                    Some(pid) => {
                        self.records.insert(id, WorkerRecord::new(id, pid, Instant::now()));
                        tracing::info!(worker_id = %id, pid, "Worker spawned");
                    }
                    None => tracing::warn!(worker_id = %id, "Worker spawned without a process id"),
                }
                self.workers.insert(
                    id,
                    Supervised {
                        process,
                        disconnecting: false,
                        recycling: false,
                    },
                );
                metrics::record_worker_spawn("success");
                metrics::record_cluster_size(self.workers.len());
                Some(id)
            }
            Err(e) => {
                tracing::error!(worker_id = %id, error = %e, "Failed to spawn worker");
                metrics::record_worker_spawn("failure");
                None
            }
        }
    }

    /// Apply one worker event.
    pub fn handle_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Message { id, message } => self.handle_message(id, message),
            WorkerEvent::Exit { id, code, signal } => self.handle_exit(id, code, signal),
        }
    }

    fn handle_message(&mut self, id: WorkerId, message: WorkerMessage) {
        match message {
            WorkerMessage::Metrics(report) => {
                if let Some(record) = self.records.get_mut(&id) {
                    record.apply(&report, Instant::now());
                    tracing::trace!(
                        worker_id = %id,
                        memory = report.memory_usage,
                        connections = report.connections,
                        "Worker metrics"
                    );
                }
            }
        }
    }

    fn handle_exit(&mut self, id: WorkerId, code: Option<i32>, signal: Option<i32>) {
        let Some(worker) = self.workers.remove(&id) else {
            tracing::debug!(worker_id = %id, "Exit event for unknown worker ignored");
            return;
        };
        self.records.remove(&id);
        metrics::record_cluster_size(self.workers.len());

        let expected = worker.disconnecting || self.shutting_down;
        metrics::record_worker_exit(expected);

        if expected {
            tracing::info!(worker_id = %id, ?code, ?signal, "Worker exited");
            return;
        }

        tracing::warn!(worker_id = %id, ?code, ?signal, "Worker died, spawning replacement");
        self.spawn_worker();
    }

    /// Ask one worker to leave. Its exit will not be replaced.
    ///
    /// Returns false if the worker is unknown.
    pub fn disconnect(&mut self, id: WorkerId) -> bool {
        let Some(worker) = self.workers.get_mut(&id) else {
            return false;
        };
        worker.disconnecting = true;
        if let Err(e) = worker.process.disconnect() {
            tracing::warn!(worker_id = %id, error = %e, "Failed to disconnect worker");
        }
        true
    }

    /// Terminate every worker that is stale or over the memory ceiling.
    ///
    /// A worker still around after being terminated by an earlier sweep is
    /// killed. Never spawns; recycled workers are replaced when their exit
    /// arrives.
    pub fn health_sweep(&mut self) {
        let decisions = health::evaluate(self.records.values(), Instant::now(), &self.config);

        for decision in decisions {
            let Some(worker) = self.workers.get_mut(&decision.worker_id) else {
                continue;
            };
            if worker.recycling {
                tracing::warn!(
                    worker_id = %decision.worker_id,
                    pid = decision.pid,
                    "Worker ignored termination, killing"
                );
                if let Err(e) = worker.process.force_kill() {
                    tracing::error!(worker_id = %decision.worker_id, error = %e, "Failed to kill worker");
                }
                continue;
            }
            worker.recycling = true;
            tracing::warn!(
                worker_id = %decision.worker_id,
                pid = decision.pid,
                reason = %decision.reason,
                "Recycling worker"
            );
            metrics::record_worker_recycle(decision.reason.as_str());
            if let Err(e) = worker.process.terminate() {
                tracing::error!(worker_id = %decision.worker_id, error = %e, "Failed to terminate worker");
            }
        }
    }

    /// Aggregate over the current worker records.
    pub fn metrics(&self) -> ClusterMetrics {
        ClusterMetrics::aggregate(self.records.values())
    }

    /// Number of live supervised workers.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Ids of live supervised workers, sorted.
    pub fn worker_ids(&self) -> Vec<WorkerId> {
        let mut ids: Vec<_> = self.workers.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn record(&self, id: WorkerId) -> Option<&WorkerRecord> {
        self.records.get(&id)
    }

    /// Receive the next worker event.
    pub async fn next_event(&mut self) -> Option<WorkerEvent> {
        self.events_rx.recv().await
    }

    /// Disconnect every worker, then force-kill whatever remains after the
    /// grace period. No replacements are spawned once this starts.
    pub async fn shutdown(&mut self) -> ShutdownOutcome {
        self.shutting_down = true;
        tracing::info!(workers = self.workers.len(), "Shutting down worker pool");

        for (id, worker) in self.workers.iter_mut() {
            worker.disconnecting = true;
            if let Err(e) = worker.process.disconnect() {
                tracing::warn!(worker_id = %id, error = %e, "Failed to disconnect worker");
            }
        }

        let grace = time::sleep(self.config.shutdown_grace());
        tokio::pin!(grace);

        while !self.workers.is_empty() {
            tokio::select! {
                Some(event) = self.events_rx.recv() => self.handle_event(event),
                _ = &mut grace => break,
            }
        }

        if self.workers.is_empty() {
            tracing::info!("All workers exited");
            return ShutdownOutcome::Graceful;
        }

        let killed = self.workers.len();
        tracing::warn!(remaining = killed, "Grace period expired, force-killing workers");
        for (id, mut worker) in self.workers.drain() {
            if let Err(e) = worker.process.force_kill() {
                tracing::error!(worker_id = %id, error = %e, "Failed to kill worker");
            }
        }
        self.records.clear();
        metrics::record_cluster_size(0);
        ShutdownOutcome::Forced { killed }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<ClusterCommand>) -> ShutdownOutcome {
        let period = self.config.health_check_interval();
        let mut ticker = time::interval_at(Instant::now() + period, period);

        loop {
            // Events first, so commands observe every event queued before them.
            tokio::select! {
                biased;
                Some(event) = self.events_rx.recv() => self.handle_event(event),
                _ = ticker.tick() => self.health_sweep(),
                command = commands.recv() => match command {
                    Some(ClusterCommand::Metrics(reply)) => {
                        let _ = reply.send(self.metrics());
                    }
                    Some(ClusterCommand::Shutdown) => break,
                    None => {
                        tracing::debug!("All cluster handles dropped");
                        break;
                    }
                },
            }
        }

        self.shutdown().await
    }
}

impl<S: WorkerSpawner + 'static> ClusterManager<S> {
    /// Initialize the pool and run the supervision loop on a new task.
    ///
    /// The task ends after shutdown, yielding its outcome.
    pub fn start(mut self) -> (ClusterHandle, JoinHandle<ShutdownOutcome>) {
        let (tx, rx) = mpsc::channel(16);
        self.initialize();
        let task = tokio::spawn(self.run(rx));
        (ClusterHandle { commands: tx }, task)
    }
}

#[derive(Debug)]
enum ClusterCommand {
    Metrics(oneshot::Sender<ClusterMetrics>),
    Shutdown,
}

/// Cloneable handle to a running [`ClusterManager`].
#[derive(Debug, Clone)]
pub struct ClusterHandle {
    commands: mpsc::Sender<ClusterCommand>,
}

impl ClusterHandle {
    /// Current aggregate metrics, computed by the manager task.
    pub async fn metrics(&self) -> Result<ClusterMetrics, ClusterError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(ClusterCommand::Metrics(tx))
            .await
            .map_err(|_| ClusterError::ManagerGone)?;
        rx.await.map_err(|_| ClusterError::ManagerGone)
    }

    /// Begin two-phase shutdown. Await the manager's task for the outcome.
    pub async fn shutdown(&self) -> Result<(), ClusterError> {
        self.commands
            .send(ClusterCommand::Shutdown)
            .await
            .map_err(|_| ClusterError::ManagerGone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes() {
        assert_eq!(ShutdownOutcome::Graceful.exit_code(), 0);
        assert_eq!(ShutdownOutcome::Forced { killed: 2 }.exit_code(), 1);
    }
}
