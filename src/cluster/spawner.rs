//! OS process spawner.
//!
//! Workers are the current binary re-executed with the worker role set in
//! the environment. Their stdout is the message channel; stderr is inherited
//! so worker logs interleave with the primary's.

use std::ffi::OsString;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::Stdio;

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStdout, Command};

use crate::cluster::message::WorkerMessage;
use crate::cluster::process::{WorkerEvent, WorkerEventSender, WorkerId, WorkerProcess, WorkerSpawner};
use crate::cluster::worker::{ROLE_ENV, WORKER_ID_ENV, WORKER_ROLE};
use crate::cluster::ClusterError;

/// Spawns workers as child OS processes.
#[derive(Debug, Clone)]
pub struct OsProcessSpawner {
    program: PathBuf,
    args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
}

impl OsProcessSpawner {
    /// Spawner for an arbitrary program.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    /// Spawner that re-executes the running binary with the same arguments.
    pub fn current_exe() -> Result<Self, ClusterError> {
        let program = std::env::current_exe().map_err(ClusterError::CurrentExe)?;
        Ok(Self::new(program).args(std::env::args_os().skip(1)))
    }

    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }
}

impl WorkerSpawner for OsProcessSpawner {
    fn spawn(
        &mut self,
        id: WorkerId,
        events: WorkerEventSender,
    ) -> Result<Box<dyn WorkerProcess>, ClusterError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .env(ROLE_ENV, WORKER_ROLE)
            .env(WORKER_ID_ENV, id.0.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(ClusterError::Spawn)?;

        let pid = child.id();

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_messages(id, stdout, events.clone()));
        }

        tokio::spawn(async move {
            let (code, signal) = match child.wait().await {
                Ok(status) => (status.code(), status.signal()),
                Err(e) => {
                    tracing::warn!(worker_id = %id, error = %e, "Failed to wait on worker");
                    (None, None)
                }
            };
            let _ = events.send(WorkerEvent::Exit { id, code, signal });
        });

        Ok(Box::new(OsWorker { id, pid }))
    }
}

async fn forward_messages(id: WorkerId, stdout: ChildStdout, events: WorkerEventSender) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if let Some(message) = WorkerMessage::from_line(&line) {
                    if events.send(WorkerEvent::Message { id, message }).is_err() {
                        break;
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(worker_id = %id, error = %e, "Worker stdout closed");
                break;
            }
        }
    }
}

/// Handle to a spawned child process.
#[derive(Debug)]
struct OsWorker {
    id: WorkerId,
    pid: Option<u32>,
}

impl OsWorker {
    fn signal(&self, sig: Signal) -> io::Result<()> {
        let Some(pid) = self.pid else {
            return Ok(());
        };
        tracing::debug!(worker_id = %self.id, pid, signal = %sig, "Signalling worker");
        match signal::kill(Pid::from_raw(pid as i32), sig) {
            // Already gone; the exit event is on its way.
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(io::Error::from(e)),
        }
    }
}

impl WorkerProcess for OsWorker {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn disconnect(&mut self) -> io::Result<()> {
        self.signal(Signal::SIGTERM)
    }

    fn terminate(&mut self) -> io::Result<()> {
        self.signal(Signal::SIGTERM)
    }

    fn force_kill(&mut self) -> io::Result<()> {
        self.signal(Signal::SIGKILL)
    }
}
