//! Seams between the manager and the processes it supervises.
//!
//! The manager never touches OS processes directly: it asks a
//! [`WorkerSpawner`] for new workers and controls them through
//! [`WorkerProcess`]. Lifecycle and message traffic flows back as
//! [`WorkerEvent`]s on a channel the manager owns.

use std::fmt;
use std::io;

use tokio::sync::mpsc;

use crate::cluster::message::WorkerMessage;
use crate::cluster::ClusterError;

/// Primary-assigned worker identity. Never reused within one manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub u64);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Something that happened to a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// The worker pushed a message.
    Message { id: WorkerId, message: WorkerMessage },
    /// The worker process is gone.
    Exit {
        id: WorkerId,
        code: Option<i32>,
        signal: Option<i32>,
    },
}

pub type WorkerEventSender = mpsc::UnboundedSender<WorkerEvent>;

/// Control surface for one supervised worker.
pub trait WorkerProcess: Send + fmt::Debug {
    /// OS process id, if the platform reported one.
    fn pid(&self) -> Option<u32>;

    /// Ask the worker to stop accepting work, finish in-flight requests and
    /// exit on its own.
    fn disconnect(&mut self) -> io::Result<()>;

    /// Send the termination signal used for recycling.
    fn terminate(&mut self) -> io::Result<()>;

    /// Kill immediately.
    fn force_kill(&mut self) -> io::Result<()>;
}

/// Creates worker processes.
///
/// Implementations must report every message and the eventual exit of the
/// spawned worker on `events`, tagged with `id`.
pub trait WorkerSpawner: Send {
    fn spawn(
        &mut self,
        id: WorkerId,
        events: WorkerEventSender,
    ) -> Result<Box<dyn WorkerProcess>, ClusterError>;
}
