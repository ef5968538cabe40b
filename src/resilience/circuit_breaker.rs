//! Circuit breaker for external dependency protection.
//!
//! # States
//! - Closed: normal operation, calls pass through and are counted
//! - Open: dependency assumed down, calls fail fast
//! - Half-Open: trial calls decide whether the dependency recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure rate >= threshold (once minimum_requests observed)
//! Open → Half-Open: first call at or after next_attempt
//! Half-Open → Closed: success_threshold consecutive successes (counters reset)
//! Half-Open → Open: any counted failure (next_attempt rescheduled)
//! ```
//!
//! Calls are never serialized: the wrapped future runs outside the lock and
//! only the bookkeeping is shared. A burst of concurrent failures may push the
//! counters past the threshold before the trip is observed.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::observability::metrics;
use crate::resilience::clock::Clock;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitBreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitBreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitBreakerState::Closed => "CLOSED",
            CircuitBreakerState::Open => "OPEN",
            CircuitBreakerState::HalfOpen => "HALF_OPEN",
        }
    }
}

impl fmt::Display for CircuitBreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-dependency breaker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failure rate (percent) at which a closed breaker opens.
    pub failure_threshold_percent: u32,

    /// Time an open breaker waits before admitting a trial call.
    pub recovery_timeout_ms: u64,

    /// Length of the closed-state observation window.
    pub monitoring_period_ms: u64,

    /// Error messages or type names that are returned but never counted.
    pub expected_errors: Vec<String>,

    /// Consecutive half-open successes required to close.
    pub success_threshold: u32,

    /// Observed calls required before the failure rate is evaluated.
    pub minimum_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold_percent: 50,
            recovery_timeout_ms: 30_000,
            monitoring_period_ms: 60_000,
            expected_errors: Vec::new(),
            success_threshold: 3,
            minimum_requests: 10,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }

    pub fn monitoring_period(&self) -> Duration {
        Duration::from_millis(self.monitoring_period_ms)
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerStats {
    pub state: CircuitBreakerState,
    pub failures: u64,
    pub successes: u64,
    pub last_failure_time: Option<Instant>,
    pub last_success_time: Option<Instant>,
    pub next_attempt: Option<Instant>,
}

/// Error returned by a breaker-wrapped call.
#[derive(Debug)]
pub enum BreakerError<E> {
    /// The breaker rejected the call without invoking it.
    Open { name: String },
    /// The wrapped call failed; the original error, unmodified.
    Inner(E),
}

impl<E> BreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open { .. })
    }

    pub fn into_inner(self) -> Option<E> {
        match self {
            BreakerError::Inner(e) => Some(e),
            BreakerError::Open { .. } => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for BreakerError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerError::Open { name } => write!(f, "Circuit breaker '{}' is OPEN", name),
            BreakerError::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E> std::error::Error for BreakerError<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BreakerError::Inner(e) => Some(e),
            BreakerError::Open { .. } => None,
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitBreakerState,
    failures: u64,
    successes: u64,
    half_open_successes: u32,
    window_start: Instant,
    last_failure_time: Option<Instant>,
    last_success_time: Option<Instant>,
    next_attempt: Option<Instant>,
}

impl BreakerInner {
    fn new(now: Instant) -> Self {
        Self {
            state: CircuitBreakerState::Closed,
            failures: 0,
            successes: 0,
            half_open_successes: 0,
            window_start: now,
            last_failure_time: None,
            last_success_time: None,
            next_attempt: None,
        }
    }
}

/// Failure-isolation state machine for one named dependency.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        let inner = Mutex::new(BreakerInner::new(clock.now()));
        Self {
            name: name.into(),
            config,
            clock,
            inner,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitBreakerState {
        self.inner.lock().state
    }

    /// Run `f` under this breaker.
    ///
    /// Returns the call's own value or error. While open (and before the
    /// recovery deadline) `f` is not invoked and [`BreakerError::Open`] is
    /// returned instead.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        self.try_acquire::<E>()?;

        match f().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(e) => {
                if self.is_expected(&e) {
                    tracing::debug!(breaker = %self.name, error = %e, "Expected error, not counted");
                    metrics::record_breaker_call(&self.name, "expected");
                } else {
                    self.on_failure();
                }
                Err(BreakerError::Inner(e))
            }
        }
    }

    /// Force the breaker closed with zeroed counters.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        *inner = BreakerInner::new(self.clock.now());
        drop(inner);

        tracing::info!(breaker = %self.name, "Circuit breaker reset");
        metrics::record_breaker_state(&self.name, CircuitBreakerState::Closed);
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let inner = self.inner.lock();
        CircuitBreakerStats {
            state: inner.state,
            failures: inner.failures,
            successes: inner.successes,
            last_failure_time: inner.last_failure_time,
            last_success_time: inner.last_success_time,
            next_attempt: inner.next_attempt,
        }
    }

    fn try_acquire<E>(&self) -> Result<(), BreakerError<E>> {
        let mut inner = self.inner.lock();
        if inner.state != CircuitBreakerState::Open {
            return Ok(());
        }

        let now = self.clock.now();
        let next_attempt = inner.next_attempt;
        match next_attempt {
            Some(at) if now < at => {
                drop(inner);
                tracing::debug!(breaker = %self.name, "Call rejected, circuit open");
                metrics::record_breaker_rejection(&self.name);
                Err(BreakerError::Open {
                    name: self.name.clone(),
                })
            }
            _ => {
                inner.state = CircuitBreakerState::HalfOpen;
                inner.half_open_successes = 0;
                drop(inner);
                tracing::info!(breaker = %self.name, "Circuit breaker half-open, admitting trial call");
                metrics::record_breaker_state(&self.name, CircuitBreakerState::HalfOpen);
                Ok(())
            }
        }
    }

    fn on_success(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.last_success_time = Some(now);
        metrics::record_breaker_call(&self.name, "success");

        let state = inner.state;
        match state {
            CircuitBreakerState::Closed => {
                self.roll_window(&mut inner, now);
                inner.successes += 1;
            }
            CircuitBreakerState::HalfOpen => {
                inner.successes += 1;
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.success_threshold {
                    let last_failure_time = inner.last_failure_time;
                    *inner = BreakerInner::new(now);
                    inner.last_failure_time = last_failure_time;
                    inner.last_success_time = Some(now);
                    drop(inner);
                    tracing::info!(breaker = %self.name, "Circuit breaker closed");
                    metrics::record_breaker_state(&self.name, CircuitBreakerState::Closed);
                }
            }
            // Started before the trip; counted, no transition.
            CircuitBreakerState::Open => {
                inner.successes += 1;
            }
        }
    }

    fn on_failure(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.last_failure_time = Some(now);
        metrics::record_breaker_call(&self.name, "failure");

        let state = inner.state;
        match state {
            CircuitBreakerState::Closed => {
                self.roll_window(&mut inner, now);
                inner.failures += 1;
                if self.should_trip(&inner) {
                    self.trip(&mut inner, now);
                }
            }
            CircuitBreakerState::HalfOpen => {
                inner.failures += 1;
                self.trip(&mut inner, now);
            }
            CircuitBreakerState::Open => {
                inner.failures += 1;
            }
        }
    }

    fn should_trip(&self, inner: &BreakerInner) -> bool {
        let total = inner.failures + inner.successes;
        if total == 0 || total < u64::from(self.config.minimum_requests) {
            return false;
        }
        inner.failures * 100 >= u64::from(self.config.failure_threshold_percent) * total
    }

    fn trip(&self, inner: &mut BreakerInner, now: Instant) {
        inner.state = CircuitBreakerState::Open;
        inner.half_open_successes = 0;
        inner.next_attempt = Some(now + self.config.recovery_timeout());

        tracing::warn!(
            breaker = %self.name,
            failures = inner.failures,
            successes = inner.successes,
            recovery_timeout_ms = self.config.recovery_timeout_ms,
            "Circuit breaker opened"
        );
        metrics::record_breaker_state(&self.name, CircuitBreakerState::Open);
    }

    fn roll_window(&self, inner: &mut BreakerInner, now: Instant) {
        if now.duration_since(inner.window_start) >= self.config.monitoring_period() {
            inner.failures = 0;
            inner.successes = 0;
            inner.window_start = now;
        }
    }

    fn is_expected<E: fmt::Display>(&self, error: &E) -> bool {
        if self.config.expected_errors.is_empty() {
            return false;
        }
        let message = error.to_string();
        let type_name = short_type_name::<E>();
        self.config
            .expected_errors
            .iter()
            .filter(|entry| !entry.is_empty())
            .any(|entry| entry == type_name || message.contains(entry.as_str()))
    }
}

/// Last path segment of a type name, generics stripped.
fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::clock::ManualClock;

    #[derive(Debug)]
    struct Timeout;

    impl fmt::Display for Timeout {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("upstream did not answer")
        }
    }

    fn breaker(config: CircuitBreakerConfig) -> (CircuitBreaker, ManualClock) {
        let clock = ManualClock::new();
        (CircuitBreaker::new("test", config, Arc::new(clock.clone())), clock)
    }

    async fn fail(b: &CircuitBreaker) -> Result<(), BreakerError<String>> {
        b.call(|| async { Err::<(), _>("boom".to_string()) }).await
    }

    async fn succeed(b: &CircuitBreaker) -> Result<u32, BreakerError<String>> {
        b.call(|| async { Ok::<_, String>(7) }).await
    }

    #[tokio::test]
    async fn stays_closed_below_minimum_requests() {
        let (b, _) = breaker(CircuitBreakerConfig::default());
        for _ in 0..9 {
            assert!(matches!(fail(&b).await, Err(BreakerError::Inner(_))));
        }
        assert_eq!(b.state(), CircuitBreakerState::Closed);

        assert!(fail(&b).await.is_err());
        assert_eq!(b.state(), CircuitBreakerState::Open);
    }

    #[tokio::test]
    async fn open_breaker_does_not_invoke_call() {
        let config = CircuitBreakerConfig {
            minimum_requests: 1,
            ..Default::default()
        };
        let (b, _) = breaker(config);
        let _ = fail(&b).await;

        let mut invoked = false;
        let result = b
            .call(|| {
                invoked = true;
                async { Ok::<_, String>(()) }
            })
            .await;
        assert!(result.unwrap_err().is_open());
        assert!(!invoked);
    }

    #[tokio::test]
    async fn failure_in_half_open_reopens_and_reschedules() {
        let config = CircuitBreakerConfig {
            minimum_requests: 1,
            ..Default::default()
        };
        let (b, clock) = breaker(config);
        let _ = fail(&b).await;
        let first_deadline = b.stats().next_attempt.unwrap();

        clock.advance(Duration::from_millis(30_000));
        assert!(matches!(fail(&b).await, Err(BreakerError::Inner(_))));

        let stats = b.stats();
        assert_eq!(stats.state, CircuitBreakerState::Open);
        assert!(stats.next_attempt.unwrap() > first_deadline);
        assert!(fail(&b).await.unwrap_err().is_open());
    }

    #[tokio::test]
    async fn half_open_admits_concurrent_calls() {
        let config = CircuitBreakerConfig {
            minimum_requests: 1,
            ..Default::default()
        };
        let (b, clock) = breaker(config);
        let _ = fail(&b).await;
        clock.advance(Duration::from_millis(30_000));

        // Both calls must be in flight together to pass the barrier.
        let barrier = tokio::sync::Barrier::new(2);
        let trial = || async {
            barrier.wait().await;
            Ok::<_, String>(())
        };
        let both = async { tokio::join!(b.call(trial), b.call(trial)) };
        let (first, second) = tokio::time::timeout(Duration::from_secs(1), both)
            .await
            .expect("second half-open call was not admitted");

        assert!(first.is_ok());
        assert!(second.is_ok());
        let stats = b.stats();
        assert_eq!(stats.state, CircuitBreakerState::HalfOpen);
        assert_eq!(stats.successes, 2);
    }

    #[tokio::test]
    async fn expected_errors_are_returned_but_not_counted() {
        let config = CircuitBreakerConfig {
            minimum_requests: 1,
            expected_errors: vec!["ECONNRESET".into(), "Timeout".into()],
            ..Default::default()
        };
        let (b, _) = breaker(config);

        let err = b
            .call(|| async { Err::<(), _>("read ECONNRESET".to_string()) })
            .await
            .unwrap_err();
        assert_eq!(err.into_inner().as_deref(), Some("read ECONNRESET"));

        let err = b.call(|| async { Err::<(), _>(Timeout) }).await.unwrap_err();
        assert!(matches!(err, BreakerError::Inner(Timeout)));

        let stats = b.stats();
        assert_eq!(stats.failures, 0);
        assert_eq!(stats.state, CircuitBreakerState::Closed);
    }

    #[tokio::test]
    async fn counters_reset_after_monitoring_period() {
        let (b, clock) = breaker(CircuitBreakerConfig::default());
        for _ in 0..6 {
            let _ = fail(&b).await;
        }
        clock.advance(Duration::from_millis(60_000));
        let _ = succeed(&b).await;

        let stats = b.stats();
        assert_eq!(stats.failures, 0);
        assert_eq!(stats.successes, 1);
    }

    #[tokio::test]
    async fn reset_clears_open_breaker() {
        let config = CircuitBreakerConfig {
            minimum_requests: 1,
            ..Default::default()
        };
        let (b, _) = breaker(config);
        let _ = fail(&b).await;
        b.reset();

        let stats = b.stats();
        assert_eq!(stats.state, CircuitBreakerState::Closed);
        assert_eq!((stats.failures, stats.successes), (0, 0));
        assert_eq!(succeed(&b).await.unwrap(), 7);
    }

    #[test]
    fn short_type_names() {
        assert_eq!(short_type_name::<Timeout>(), "Timeout");
        assert_eq!(short_type_name::<String>(), "String");
        assert_eq!(short_type_name::<Vec<u8>>(), "Vec");
    }

    #[test]
    fn state_serializes_upper_case() {
        let json = serde_json::to_string(&CircuitBreakerState::HalfOpen).unwrap();
        assert_eq!(json, "\"HALF_OPEN\"");
    }
}
