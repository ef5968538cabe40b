//! Worker → primary message channel.
//!
//! Each message is one JSON object on its own line of the worker's stdout:
//!
//! ```text
//! {"type":"metrics","data":{"memoryUsage":1048576,"cpuUsage":250000,"connections":3}}
//! ```

use serde::{Deserialize, Serialize};

/// Message pushed by a worker to the primary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum WorkerMessage {
    Metrics(MetricsReport),
}

/// Resource usage snapshot of one worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsReport {
    /// Resident memory in bytes.
    pub memory_usage: u64,
    /// Total user + system CPU time in microseconds.
    pub cpu_usage: u64,
    /// Requests currently in flight.
    pub connections: u64,
}

impl WorkerMessage {
    /// Serialize as a single line, newline included.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    /// Parse one line. Blank lines and non-message output yield `None`.
    pub fn from_line(line: &str) -> Option<Self> {
        let line = line.trim();
        if !line.starts_with('{') {
            return None;
        }
        match serde_json::from_str(line) {
            Ok(message) => Some(message),
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring unrecognized worker output");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_format() {
        let message = WorkerMessage::Metrics(MetricsReport {
            memory_usage: 1024,
            cpu_usage: 500,
            connections: 2,
        });
        assert_eq!(
            message.to_line().unwrap(),
            "{\"type\":\"metrics\",\"data\":{\"memoryUsage\":1024,\"cpuUsage\":500,\"connections\":2}}\n"
        );
    }

    #[test]
    fn parses_metrics_line() {
        let parsed = WorkerMessage::from_line(
            r#"{"type":"metrics","data":{"memoryUsage":10,"cpuUsage":20,"connections":30}}"#,
        );
        assert_eq!(
            parsed,
            Some(WorkerMessage::Metrics(MetricsReport {
                memory_usage: 10,
                cpu_usage: 20,
                connections: 30,
            }))
        );
    }

    #[test]
    fn ignores_noise() {
        assert_eq!(WorkerMessage::from_line(""), None);
        assert_eq!(WorkerMessage::from_line("READY"), None);
        assert_eq!(WorkerMessage::from_line(r#"{"type":"hello"}"#), None);
    }
}
