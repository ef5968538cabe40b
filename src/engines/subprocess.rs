//! External analysis programs.
//!
//! Two modes, chosen per engine:
//!
//! - **oneshot**: `command args... <input>` runs once per request and
//!   prints one JSON document on stdout. A leading `READY` line is
//!   tolerated.
//! - **persistent**: one long-lived child per engine. It prints `READY`,
//!   receives `{"action":"init","config":...}` once, then answers each
//!   `{"action":"analyze","audioPath":...,"sessionId":...,"timestamp":...}`
//!   line with one JSON line. A child that dies is restarted on the next
//!   request.
//!
//! In both modes `{"error": ...}` is a reported failure and `{"result": ...}`
//! is unwrapped.

use std::io;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

use crate::config::{EngineConfig, EngineMode};
use crate::resilience::timeouts::{with_timeout, TimedOut};

const READY_LINE: &str = "READY";
const STDERR_TAIL: usize = 512;

/// Error type for engine invocations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Failed to start engine '{engine}': {source}")]
    Spawn { engine: String, source: io::Error },
    #[error("Engine '{engine}' exited with {status}: {stderr}")]
    Failed {
        engine: String,
        status: String,
        stderr: String,
    },
    #[error("Engine '{engine}' closed its pipes")]
    Exited { engine: String },
    #[error("Engine '{engine}' produced invalid output: {source}")]
    InvalidOutput {
        engine: String,
        source: serde_json::Error,
    },
    #[error("Engine '{engine}' reported: {message}")]
    Reported { engine: String, message: String },
    #[error("Engine '{engine}' timed out after {limit:?}")]
    TimedOut { engine: String, limit: Duration },
}

/// One configured engine.
#[derive(Debug)]
pub struct SubprocessEngine {
    name: String,
    config: EngineConfig,
    /// Live child of a persistent engine. Requests take turns on it.
    session: Mutex<Option<Session>>,
    requests: AtomicU64,
}

impl SubprocessEngine {
    pub fn new(name: impl Into<String>, config: EngineConfig) -> Self {
        Self {
            name: name.into(),
            config,
            session: Mutex::new(None),
            requests: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the engine on `input` within the configured deadline.
    pub async fn run(&self, input: &str) -> Result<Value, EngineError> {
        match self.config.mode {
            EngineMode::Oneshot => self.run_once(input).await,
            EngineMode::Persistent => self.run_persistent(input).await,
        }
    }

    /// The child is killed if the deadline passes.
    async fn run_once(&self, input: &str) -> Result<Value, EngineError> {
        let child = Command::new(&self.config.command)
            .args(&self.config.args)
            .arg(input)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| self.spawn_error(source))?;

        tracing::debug!(engine = %self.name, pid = ?child.id(), input = %input, "Engine started");

        let output = with_timeout(self.config.timeout(), child.wait_with_output())
            .await
            .map_err(|TimedOut(limit)| self.timed_out(limit))?
            .map_err(|source| self.spawn_error(source))?;

        if !output.status.success() {
            return Err(EngineError::Failed {
                engine: self.name.clone(),
                status: output.status.to_string(),
                stderr: stderr_tail(&output.stderr),
            });
        }

        parse_output(&self.name, &output.stdout)
    }

    /// Waiting for the session counts against the deadline. On timeout the
    /// child is dropped, and with it killed.
    async fn run_persistent(&self, input: &str) -> Result<Value, EngineError> {
        let sequence = self.requests.fetch_add(1, Ordering::Relaxed) + 1;
        let request = json!({
            "action": "analyze",
            "audioPath": input,
            "sessionId": format!("{}-{}", self.name, sequence),
            "timestamp": epoch_millis(),
        });

        let exchange = async {
            let mut slot = self.session.lock().await;
            self.exchange(&mut slot, &request).await
        };
        let line = with_timeout(self.config.timeout(), exchange)
            .await
            .map_err(|TimedOut(limit)| self.timed_out(limit))??;

        parse_output(&self.name, line.as_bytes())
    }

    /// Send one request on the session in `slot` and return the reply line.
    ///
    /// The session is taken out for the duration, so a failed or abandoned
    /// exchange leaves `slot` empty and the next request starts a new child.
    async fn exchange(&self, slot: &mut Option<Session>, request: &Value) -> Result<String, EngineError> {
        let existing = slot.take().and_then(|mut session| {
            if session.is_running() {
                Some(session)
            } else {
                tracing::warn!(engine = %self.name, "Engine process exited, restarting");
                None
            }
        });
        let reused = existing.is_some();
        let mut session = match existing {
            Some(session) => session,
            None => self.start_session().await?,
        };

        let line = match session.request(&self.name, request).await {
            Err(EngineError::Exited { .. }) if reused => {
                tracing::warn!(engine = %self.name, "Engine process went away, restarting");
                session = self.start_session().await?;
                session.request(&self.name, request).await?
            }
            other => other?,
        };

        *slot = Some(session);
        Ok(line)
    }

    async fn start_session(&self) -> Result<Session, EngineError> {
        let mut child = Command::new(&self.config.command)
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| self.spawn_error(source))?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(self.spawn_error(io::Error::other("engine pipes unavailable")));
        };
        let mut session = Session {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
        };

        session.wait_ready(&self.name).await?;
        let init = json!({ "action": "init", "config": self.config.init });
        let reply = session.request(&self.name, &init).await?;
        parse_output(&self.name, reply.as_bytes())?;

        tracing::info!(engine = %self.name, pid = ?session.child.id(), "Engine process ready");
        Ok(session)
    }

    fn spawn_error(&self, source: io::Error) -> EngineError {
        EngineError::Spawn {
            engine: self.name.clone(),
            source,
        }
    }

    fn timed_out(&self, limit: Duration) -> EngineError {
        EngineError::TimedOut {
            engine: self.name.clone(),
            limit,
        }
    }
}

/// A running persistent engine process.
#[derive(Debug)]
struct Session {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

impl Session {
    fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Skip anything printed before the `READY` line.
    async fn wait_ready(&mut self, engine: &str) -> Result<(), EngineError> {
        loop {
            let line = self.recv(engine).await?;
            if line.trim() == READY_LINE {
                return Ok(());
            }
            tracing::debug!(engine = %engine, line = %line, "Engine output before READY ignored");
        }
    }

    async fn request(&mut self, engine: &str, request: &Value) -> Result<String, EngineError> {
        let mut line = request.to_string();
        line.push('\n');
        let written = async {
            self.stdin.write_all(line.as_bytes()).await?;
            self.stdin.flush().await
        };
        if let Err(e) = written.await {
            tracing::debug!(engine = %engine, error = %e, "Engine stdin closed");
            return Err(exited(engine));
        }
        self.recv(engine).await
    }

    /// Next non-blank line.
    async fn recv(&mut self, engine: &str) -> Result<String, EngineError> {
        loop {
            match self.stdout.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => return Ok(line),
                Ok(None) => return Err(exited(engine)),
                Err(e) => {
                    tracing::debug!(engine = %engine, error = %e, "Engine stdout failed");
                    return Err(exited(engine));
                }
            }
        }
    }
}

fn exited(engine: &str) -> EngineError {
    EngineError::Exited {
        engine: engine.to_string(),
    }
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

/// Decode an engine's stdout into its result document.
pub fn parse_output(engine: &str, stdout: &[u8]) -> Result<Value, EngineError> {
    let text = String::from_utf8_lossy(stdout);
    let trimmed = text.trim_start();
    let body = trimmed.strip_prefix(READY_LINE).unwrap_or(trimmed).trim();

    let document: Value = serde_json::from_str(body).map_err(|source| EngineError::InvalidOutput {
        engine: engine.to_string(),
        source,
    })?;

    match document {
        Value::Object(mut map) => {
            if let Some(error) = map.remove("error") {
                return Err(reported(engine, error));
            }
            match map.remove("result") {
                // An analysis that failed inside the engine carries its error in the result.
                Some(Value::Object(mut result)) => match result.remove("error") {
                    Some(error) => Err(reported(engine, error)),
                    None => Ok(Value::Object(result)),
                },
                Some(result) => Ok(result),
                None => Ok(Value::Object(map)),
            }
        }
        other => Ok(other),
    }
}

fn reported(engine: &str, error: Value) -> EngineError {
    let message = match error {
        Value::String(s) => s,
        other => other.to_string(),
    };
    EngineError::Reported {
        engine: engine.to_string(),
        message,
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    let start = text
        .char_indices()
        .rev()
        .nth(STDERR_TAIL.saturating_sub(1))
        .map(|(i, _)| i)
        .unwrap_or(0);
    text[start..].to_string()
}
