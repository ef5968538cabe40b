//! OS signal handling.
//!
//! SIGTERM and SIGINT both mean "shut down gracefully". The primary turns
//! that into the two-phase pool shutdown; a worker stops accepting, drains
//! and exits.

use std::fmt;
use std::io;

use tokio::signal::unix::{signal, Signal, SignalKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Terminate,
    Interrupt,
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownSignal::Terminate => f.write_str("SIGTERM"),
            ShutdownSignal::Interrupt => f.write_str("SIGINT"),
        }
    }
}

/// SIGTERM and SIGINT listeners, installed up front.
///
/// Installing is the fallible part; once this exists, waiting cannot fail.
#[derive(Debug)]
pub struct ShutdownSignals {
    terminate: Signal,
    interrupt: Signal,
}

impl ShutdownSignals {
    pub fn install() -> io::Result<Self> {
        Ok(Self {
            terminate: signal(SignalKind::terminate())?,
            interrupt: signal(SignalKind::interrupt())?,
        })
    }

    /// Wait for the first SIGTERM or SIGINT.
    pub async fn recv(mut self) -> ShutdownSignal {
        let received = tokio::select! {
            _ = self.terminate.recv() => ShutdownSignal::Terminate,
            _ = self.interrupt.recv() => ShutdownSignal::Interrupt,
        };
        tracing::info!(signal = %received, "Shutdown signal received");
        received
    }
}

/// Install the listeners and wait for the first SIGTERM or SIGINT.
pub async fn wait_for_shutdown_signal() -> io::Result<ShutdownSignal> {
    Ok(ShutdownSignals::install()?.recv().await)
}
