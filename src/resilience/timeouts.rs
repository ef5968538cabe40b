//! Timeout enforcement for external calls.
//!
//! Every subprocess engine invocation carries a deadline; a timed-out call is
//! reported as a distinct error so breakers and callers can tell it apart.

use std::future::Future;
use std::time::Duration;

/// Elapsed deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("operation timed out after {0:?}")]
pub struct TimedOut(pub Duration);

/// Run `fut` with a deadline.
pub async fn with_timeout<F, T>(limit: Duration, fut: F) -> Result<T, TimedOut>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| TimedOut(limit))
}
