//! Name-keyed registry of circuit breakers.
//!
//! Every external call in a worker goes through [`CircuitBreakerRegistry::execute`].
//! Breakers are created lazily on first use and live as long as the registry.
//! The configuration supplied on first use wins; later callers passing a
//! different configuration for the same name reuse the existing breaker and a
//! warning is logged.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::time::Instant;

use crate::resilience::circuit_breaker::{
    BreakerError, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats,
};
use crate::resilience::clock::{Clock, TokioClock};

/// Registry owning one breaker per dependency name.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    defaults: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
}

impl CircuitBreakerRegistry {
    /// Create a registry using tokio time.
    pub fn new(defaults: CircuitBreakerConfig) -> Self {
        Self::with_clock(defaults, Arc::new(TokioClock))
    }

    pub fn with_clock(defaults: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            breakers: DashMap::new(),
            defaults,
            clock,
        }
    }

    /// Current time on the registry's clock.
    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    /// Configuration used for names first seen without one.
    pub fn defaults(&self) -> &CircuitBreakerConfig {
        &self.defaults
    }

    /// Fetch the breaker for `name`, creating it on first use.
    pub fn get_or_create(
        &self,
        name: &str,
        config: Option<&CircuitBreakerConfig>,
    ) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(name) {
            let breaker = Arc::clone(existing.value());
            drop(existing);
            if let Some(requested) = config {
                if requested != breaker.config() {
                    tracing::warn!(
                        breaker = %name,
                        "Ignoring differing configuration for existing circuit breaker"
                    );
                }
            }
            return breaker;
        }

        let entry = self.breakers.entry(name.to_string()).or_insert_with(|| {
            let config = config.cloned().unwrap_or_else(|| self.defaults.clone());
            tracing::debug!(
                breaker = %name,
                failure_threshold_percent = config.failure_threshold_percent,
                recovery_timeout_ms = config.recovery_timeout_ms,
                "Circuit breaker created"
            );
            Arc::new(CircuitBreaker::new(name, config, Arc::clone(&self.clock)))
        });
        Arc::clone(entry.value())
    }

    /// Run `f` through the breaker named `name`.
    ///
    /// `config` only takes effect if this is the first time `name` is seen.
    pub async fn execute<F, Fut, T, E>(
        &self,
        name: &str,
        f: F,
        config: Option<&CircuitBreakerConfig>,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let breaker = self.get_or_create(name, config);
        breaker.call(f).await
    }

    /// Snapshot of every breaker, keyed by name.
    pub fn get_status(&self) -> BTreeMap<String, CircuitBreakerStats> {
        self.breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().stats()))
            .collect()
    }

    /// Force one breaker closed. Returns false for unknown names.
    pub fn reset(&self, name: &str) -> bool {
        let breaker = match self.breakers.get(name) {
            Some(entry) => Arc::clone(entry.value()),
            None => return false,
        };
        breaker.reset();
        true
    }

    pub fn reset_all(&self) {
        let breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.iter().map(|e| Arc::clone(e.value())).collect();
        for breaker in breakers {
            breaker.reset();
        }
    }

    /// Drop a breaker; the next call under that name starts fresh.
    pub fn remove(&self, name: &str) -> bool {
        self.breakers.remove(name).is_some()
    }

    pub fn get_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.breakers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::circuit_breaker::CircuitBreakerState;
    use crate::resilience::clock::ManualClock;

    fn registry() -> CircuitBreakerRegistry {
        CircuitBreakerRegistry::with_clock(
            CircuitBreakerConfig::default(),
            Arc::new(ManualClock::new()),
        )
    }

    #[tokio::test]
    async fn breakers_are_created_lazily() {
        let registry = registry();
        assert!(registry.get_names().is_empty());

        let value = registry
            .execute("cache", || async { Ok::<_, String>("hit") }, None)
            .await
            .unwrap();
        assert_eq!(value, "hit");
        assert_eq!(registry.get_names(), vec!["cache".to_string()]);
    }

    #[tokio::test]
    async fn first_config_wins() {
        let registry = registry();
        let strict = CircuitBreakerConfig {
            minimum_requests: 1,
            ..Default::default()
        };
        let lenient = CircuitBreakerConfig {
            minimum_requests: 100,
            ..Default::default()
        };

        let _ = registry
            .execute("relay", || async { Ok::<_, String>(()) }, Some(&strict))
            .await;
        let breaker = registry.get_or_create("relay", Some(&lenient));
        assert_eq!(breaker.config(), &strict);
    }

    #[tokio::test]
    async fn same_name_shares_one_breaker() {
        let registry = registry();
        let a = registry.get_or_create("ml", None);
        let b = registry.get_or_create("ml", None);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn reset_unknown_name_returns_false() {
        let registry = registry();
        assert!(!registry.reset("missing"));

        registry.get_or_create("present", None);
        assert!(registry.reset("present"));
    }

    #[tokio::test]
    async fn remove_and_reset_all() {
        let registry = registry();
        let config = CircuitBreakerConfig {
            minimum_requests: 1,
            ..Default::default()
        };
        for name in ["a", "b"] {
            let _ = registry
                .execute(name, || async { Err::<(), _>("down".to_string()) }, Some(&config))
                .await;
        }
        assert!(registry
            .get_status()
            .values()
            .all(|s| s.state == CircuitBreakerState::Open));

        registry.reset_all();
        assert!(registry
            .get_status()
            .values()
            .all(|s| s.state == CircuitBreakerState::Closed && s.failures == 0));

        assert!(registry.remove("a"));
        assert!(!registry.remove("a"));
        assert_eq!(registry.get_names(), vec!["b".to_string()]);
    }
}
