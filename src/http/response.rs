//! Error → HTTP status mapping.
//!
//! - Unknown engine: 404
//! - Breaker open: 503
//! - Engine deadline: 504
//! - Any other engine failure: 502

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::engines::{AnalysisError, EngineError};

impl AnalysisError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AnalysisError::UnknownEngine(_) => StatusCode::NOT_FOUND,
            AnalysisError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AnalysisError::Engine(EngineError::TimedOut { .. }) => StatusCode::GATEWAY_TIMEOUT,
            AnalysisError::Engine(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for AnalysisError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn status_mapping() {
        assert_eq!(
            AnalysisError::UnknownEngine("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AnalysisError::Unavailable("x".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AnalysisError::Engine(EngineError::TimedOut {
                engine: "x".into(),
                limit: Duration::from_secs(1),
            })
            .status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            AnalysisError::Engine(EngineError::Reported {
                engine: "x".into(),
                message: "bad input".into(),
            })
            .status_code(),
            StatusCode::BAD_GATEWAY
        );
    }
}
