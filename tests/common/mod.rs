//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use parking_lot::Mutex;

use media_cluster::cluster::process::WorkerEventSender;
use media_cluster::cluster::{
    ClusterError, ClusterManager, MetricsReport, WorkerEvent, WorkerId, WorkerMessage,
    WorkerProcess, WorkerSpawner,
};
use media_cluster::config::ClusterConfig;

/// Everything the mock spawner and its workers were asked to do.
#[derive(Debug, Default)]
pub struct MockLog {
    pub spawned: Vec<WorkerId>,
    pub disconnected: Vec<WorkerId>,
    pub terminated: Vec<WorkerId>,
    pub killed: Vec<WorkerId>,
    senders: HashMap<WorkerId, WorkerEventSender>,
}

/// In-process stand-in for OS worker processes.
#[derive(Debug, Clone)]
pub struct MockSpawner {
    log: Arc<Mutex<MockLog>>,
    /// Workers exit as soon as they are disconnected or terminated.
    exits_on_signal: bool,
    /// Number of upcoming spawns that fail.
    failures: Arc<Mutex<usize>>,
    with_pid: bool,
}

impl MockSpawner {
    /// Workers that exit promptly when asked.
    pub fn cooperative() -> Self {
        Self {
            log: Arc::default(),
            exits_on_signal: true,
            failures: Arc::default(),
            with_pid: true,
        }
    }

    /// Workers that ignore everything except a kill.
    pub fn stubborn() -> Self {
        Self {
            exits_on_signal: false,
            ..Self::cooperative()
        }
    }

    pub fn without_pid(mut self) -> Self {
        self.with_pid = false;
        self
    }

    pub fn fail_next(&self, count: usize) {
        *self.failures.lock() = count;
    }

    pub fn log(&self) -> parking_lot::MutexGuard<'_, MockLog> {
        self.log.lock()
    }

    pub fn spawned(&self) -> usize {
        self.log.lock().spawned.len()
    }

    /// Simulate an unexpected death.
    pub fn crash(&self, id: WorkerId) {
        self.send(id, WorkerEvent::Exit {
            id,
            code: Some(1),
            signal: None,
        });
    }

    /// Simulate a metrics push from `id`.
    pub fn report(&self, id: WorkerId, report: MetricsReport) {
        self.send(id, WorkerEvent::Message {
            id,
            message: WorkerMessage::Metrics(report),
        });
    }

    fn send(&self, id: WorkerId, event: WorkerEvent) {
        let log = self.log.lock();
        let sender = log.senders.get(&id).expect("worker was never spawned");
        sender.send(event).expect("manager dropped");
    }
}

impl WorkerSpawner for MockSpawner {
    fn spawn(
        &mut self,
        id: WorkerId,
        events: WorkerEventSender,
    ) -> Result<Box<dyn WorkerProcess>, ClusterError> {
        {
            let mut failures = self.failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(ClusterError::Spawn(io::Error::other("fork failed")));
            }
        }

        let mut log = self.log.lock();
        log.spawned.push(id);
        log.senders.insert(id, events.clone());
        Ok(Box::new(MockWorker {
            id,
            pid: self.with_pid.then_some(10_000 + id.0 as u32),
            events,
            log: Arc::clone(&self.log),
            exits_on_signal: self.exits_on_signal,
        }))
    }
}

#[derive(Debug)]
struct MockWorker {
    id: WorkerId,
    pid: Option<u32>,
    events: WorkerEventSender,
    log: Arc<Mutex<MockLog>>,
    exits_on_signal: bool,
}

impl MockWorker {
    fn exit(&self, code: Option<i32>, signal: Option<i32>) {
        let _ = self.events.send(WorkerEvent::Exit {
            id: self.id,
            code,
            signal,
        });
    }
}

impl WorkerProcess for MockWorker {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn disconnect(&mut self) -> io::Result<()> {
        self.log.lock().disconnected.push(self.id);
        if self.exits_on_signal {
            self.exit(Some(0), None);
        }
        Ok(())
    }

    fn terminate(&mut self) -> io::Result<()> {
        self.log.lock().terminated.push(self.id);
        if self.exits_on_signal {
            self.exit(None, Some(15));
        }
        Ok(())
    }

    fn force_kill(&mut self) -> io::Result<()> {
        self.log.lock().killed.push(self.id);
        self.exit(None, Some(9));
        Ok(())
    }
}

pub fn cluster_config(workers: usize) -> ClusterConfig {
    ClusterConfig {
        workers: Some(workers),
        ..ClusterConfig::default()
    }
}

/// Receive and apply `count` events.
pub async fn pump(manager: &mut ClusterManager<MockSpawner>, count: usize) {
    for _ in 0..count {
        let event = manager.next_event().await.expect("event channel closed");
        manager.handle_event(event);
    }
}
