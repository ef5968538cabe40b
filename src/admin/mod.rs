//! Admin API.
//!
//! The primary serves cluster status on `admin.bind_address`. Each worker
//! serves breaker inspection and reset routes on its own listener. Every
//! route requires `Authorization: Bearer <api_key>`.

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};

use crate::cluster::ClusterHandle;
use crate::resilience::CircuitBreakerRegistry;
use self::auth::{admin_auth_middleware, ApiKey};
use self::handlers::*;

pub fn primary_router(cluster: ClusterHandle, key: ApiKey) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/cluster", get(get_cluster))
        .with_state(cluster)
        .layer(middleware::from_fn_with_state(key, admin_auth_middleware))
}

pub fn breaker_router(registry: Arc<CircuitBreakerRegistry>, key: ApiKey) -> Router {
    Router::new()
        .route("/admin/breakers", get(list_breakers))
        .route("/admin/breakers/reset", post(reset_all_breakers))
        .route("/admin/breakers/{name}/reset", post(reset_breaker))
        .route("/admin/breakers/{name}", delete(remove_breaker))
        .with_state(registry)
        .layer(middleware::from_fn_with_state(key, admin_auth_middleware))
}
