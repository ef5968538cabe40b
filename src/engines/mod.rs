//! Analysis engines.
//!
//! # Data Flow
//! ```text
//! POST /analyze/{engine}
//!     → EngineSet::analyze
//!     → CircuitBreakerRegistry::execute(engine name)
//!     → SubprocessEngine::run (deadline, kill on timeout)
//! ```

pub mod subprocess;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::config::EngineConfig;
use crate::resilience::{BreakerError, CircuitBreakerRegistry};

pub use subprocess::{EngineError, SubprocessEngine};

/// Error returned by [`EngineSet::analyze`].
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("Unknown engine '{0}'")]
    UnknownEngine(String),
    #[error("Engine '{0}' is temporarily unavailable")]
    Unavailable(String),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl From<BreakerError<EngineError>> for AnalysisError {
    fn from(err: BreakerError<EngineError>) -> Self {
        match err {
            BreakerError::Open { name } => AnalysisError::Unavailable(name),
            BreakerError::Inner(e) => AnalysisError::Engine(e),
        }
    }
}

/// The configured engines, each behind the breaker of the same name.
#[derive(Debug)]
pub struct EngineSet {
    engines: BTreeMap<String, SubprocessEngine>,
    breakers: Arc<CircuitBreakerRegistry>,
}

impl EngineSet {
    pub fn new(configs: &BTreeMap<String, EngineConfig>, breakers: Arc<CircuitBreakerRegistry>) -> Self {
        let engines = configs
            .iter()
            .map(|(name, config)| (name.clone(), SubprocessEngine::new(name.clone(), config.clone())))
            .collect();
        Self { engines, breakers }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.engines.keys().map(String::as_str)
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    /// Run `engine` on `input` through its breaker.
    pub async fn analyze(&self, engine: &str, input: &str) -> Result<Value, AnalysisError> {
        let runner = self
            .engines
            .get(engine)
            .ok_or_else(|| AnalysisError::UnknownEngine(engine.to_string()))?;

        let result = self.breakers.execute(engine, || runner.run(input), None).await;
        if let Err(BreakerError::Open { .. }) = &result {
            tracing::warn!(engine = %engine, "Engine call rejected, breaker open");
        }
        Ok(result?)
    }
}
