//! Worker HTTP service.
//!
//! # Responsibilities
//! - Build the worker router (health, analysis, breaker admin)
//! - Wire up middleware (request id, timeout, tracing, in-flight tracking)
//! - Bind the shared listener and serve until the shutdown future resolves

use std::future::Future;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::admin::{self, auth::ApiKey};
use crate::cluster::worker::WorkerServer;
use crate::config::ServerConfig;
use crate::engines::{AnalysisError, EngineSet};
use crate::net::{bind_shared, ConnectionTracker, ListenerError};
use crate::resilience::CircuitBreakerRegistry;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub engines: Arc<EngineSet>,
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    /// Path of the media file to analyze.
    pub input: String,
}

/// The service each worker process runs.
pub struct WorkerService {
    config: ServerConfig,
    registry: Arc<CircuitBreakerRegistry>,
    engines: Arc<EngineSet>,
    connections: ConnectionTracker,
}

impl WorkerService {
    /// Build the service with a fresh breaker registry.
    ///
    /// Per-dependency breaker overrides from the config are registered up
    /// front so they take effect before the first call.
    pub fn new(config: ServerConfig) -> Self {
        let registry = CircuitBreakerRegistry::new(config.breakers.defaults.clone());
        Self::with_registry(config, Arc::new(registry))
    }

    pub fn with_registry(config: ServerConfig, registry: Arc<CircuitBreakerRegistry>) -> Self {
        for (name, breaker) in &config.breakers.services {
            registry.get_or_create(name, Some(breaker));
        }
        let engines = Arc::new(EngineSet::new(&config.engines, Arc::clone(&registry)));
        Self {
            config,
            registry,
            engines,
            connections: ConnectionTracker::new(),
        }
    }

    pub fn registry(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.registry
    }

    pub fn connections(&self) -> &ConnectionTracker {
        &self.connections
    }

    /// Build the Axum router with all middleware layers.
    pub fn router(&self) -> Router {
        let state = AppState {
            engines: Arc::clone(&self.engines),
        };

        let mut router = Router::new()
            .route("/health", get(health_handler))
            .route("/analyze/{engine}", post(analyze_handler))
            .with_state(state);

        if self.config.admin.enabled {
            router = router.merge(admin::breaker_router(
                Arc::clone(&self.registry),
                ApiKey::new(&self.config.admin.api_key),
            ));
        }

        router
            .layer(middleware::from_fn_with_state(
                self.connections.clone(),
                track_in_flight,
            ))
            .layer(TimeoutLayer::with_status_code(
                StatusCode::REQUEST_TIMEOUT,
                self.config.worker.request_timeout(),
            ))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// Bind the shared listener and serve until `shutdown` resolves.
    ///
    /// Resolves once the listener is bound; in-flight requests drain after
    /// `shutdown` before [`WorkerServer::finished`] completes.
    pub async fn start<F>(self, shutdown: F) -> Result<WorkerServer, ListenerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = bind_shared(&self.config.worker.bind_address)?;
        let app = self.router();
        let connections = self.connections.clone();

        let finished = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await?;
            tracing::info!("HTTP server stopped");
            Ok::<(), std::io::Error>(())
        });

        Ok(WorkerServer {
            connections,
            finished,
        })
    }
}

async fn track_in_flight(
    State(tracker): State<ConnectionTracker>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let _guard = tracker.track();
    next.run(request).await
}

async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "pid": std::process::id(),
    }))
}

async fn analyze_handler(
    State(state): State<AppState>,
    Path(engine): Path<String>,
    Json(body): Json<AnalyzeRequest>,
) -> Result<Json<Value>, AnalysisError> {
    tracing::debug!(engine = %engine, input = %body.input, "Analysis requested");
    let result = state.engines.analyze(&engine, &body.input).await?;
    Ok(Json(json!({ "engine": engine, "result": result })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{header, Method};
    use tower::ServiceExt;

    use crate::config::EngineConfig;

    fn config() -> ServerConfig {
        let mut config = ServerConfig::default();
        config.admin.enabled = true;
        config.admin.api_key = "k".to_string();
        config.engines.insert(
            "echo".to_string(),
            EngineConfig {
                command: "/bin/sh".to_string(),
                args: vec!["-c".to_string(), "printf '{\"file\":\"%s\"}' \"$1\"".to_string(), "echo".to_string()],
                timeout_secs: 5,
                ..EngineConfig::default()
            },
        );
        config
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok_with_request_id() {
        let service = WorkerService::new(config());
        let response = service
            .router()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn analyze_runs_engine() {
        let service = WorkerService::new(config());
        let request = Request::builder()
            .method(Method::POST)
            .uri("/analyze/echo")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"input":"/tmp/clip.wav"}"#))
            .unwrap();
        let response = service.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["result"]["file"], "/tmp/clip.wav");
        assert_eq!(service.connections().active_count(), 0);
        assert_eq!(service.registry().get_names(), vec!["echo".to_string()]);
    }

    #[tokio::test]
    async fn unknown_engine_is_404() {
        let service = WorkerService::new(config());
        let request = Request::builder()
            .method(Method::POST)
            .uri("/analyze/face")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"input":"x"}"#))
            .unwrap();
        let response = service.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn slow_request_times_out_with_408() {
        let mut config = config();
        config.worker.request_timeout_secs = 1;
        config.engines.insert(
            "slow".to_string(),
            EngineConfig {
                command: "/bin/sh".to_string(),
                args: vec!["-c".to_string(), "sleep 5".to_string(), "slow".to_string()],
                timeout_secs: 10,
                ..EngineConfig::default()
            },
        );
        let service = WorkerService::new(config);
        let request = Request::builder()
            .method(Method::POST)
            .uri("/analyze/slow")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"input":"x"}"#))
            .unwrap();
        let response = service.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    }

    #[tokio::test]
    async fn breaker_admin_requires_key() {
        let service = WorkerService::new(config());
        let response = service
            .router()
            .oneshot(Request::get("/admin/breakers").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn breaker_admin_reset_unknown_is_404() {
        let service = WorkerService::new(config());
        let request = Request::post("/admin/breakers/nope/reset")
            .header(header::AUTHORIZATION, "Bearer k")
            .body(Body::empty())
            .unwrap();
        let response = service.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn configured_services_are_preregistered() {
        let mut config = config();
        config
            .breakers
            .services
            .insert("relay".to_string(), Default::default());
        let service = WorkerService::new(config);

        let request = Request::get("/admin/breakers")
            .header(header::AUTHORIZATION, "Bearer k")
            .body(Body::empty())
            .unwrap();
        let response = service.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["relay"]["state"], "CLOSED");
    }
}
