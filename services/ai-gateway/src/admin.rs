//! Admin API for pool inspection and reset
//!
//! Runs on a separate listener (default 127.0.0.1:9090). Every route requires
//! an `x-admin-key` header matching the configured admin key; with no key
//! configured, every call is rejected.
//!
//! Endpoints:
//! - `GET /admin/stats`: aggregate stats across all pools
//! - `POST /admin/reset-keys`: return every exhausted key to rotation
//! - `GET /admin/pools/{name}`: one pool's snapshot and status
//! - `POST /admin/pools/{name}/reset`: reset one pool

use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use common::Secret;
use tracing::{info, warn};

use crate::gateway::Gateway;
use crate::proxy::error_response;
use crate::service::ServiceMetrics;

/// Header carrying the admin key.
pub const ADMIN_KEY_HEADER: &str = "x-admin-key";

/// Shared state for admin API handlers.
#[derive(Clone)]
pub struct AdminState {
    gateway: Arc<Gateway>,
    api_key: Option<Secret<String>>,
    service: ServiceMetrics,
}

impl AdminState {
    pub fn new(gateway: Arc<Gateway>, api_key: Option<Secret<String>>, service: ServiceMetrics) -> Self {
        Self {
            gateway,
            api_key,
            service,
        }
    }
}

/// Build the admin axum router with all pool management endpoints.
pub fn build_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/stats", get(stats))
        .route("/admin/reset-keys", post(reset_keys))
        .route("/admin/pools/{name}", get(pool_status))
        .route("/admin/pools/{name}/reset", post(reset_pool))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin_key))
        .with_state(state)
}

fn request_id() -> String {
    format!("req_{}", uuid::Uuid::new_v4().as_simple())
}

fn json_ok(body: serde_json::Value) -> Response {
    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

/// Reject requests without a matching `x-admin-key`.
async fn require_admin_key(State(state): State<AdminState>, request: Request, next: Next) -> Response {
    let presented = request
        .headers()
        .get(ADMIN_KEY_HEADER)
        .and_then(|v| v.to_str().ok());

    let authorized = match (&state.api_key, presented) {
        (Some(expected), Some(presented)) => expected.matches(presented),
        _ => false,
    };

    if !authorized {
        warn!(path = %request.uri().path(), "rejected admin request");
        return error_response(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "missing or invalid admin key",
            &request_id(),
        );
    }

    next.run(request).await
}

/// GET /admin/stats: Aggregate counts across every pool.
async fn stats(State(state): State<AdminState>) -> Response {
    json_ok(serde_json::json!({
        "key_pool": state.gateway.registry().global_stats(),
        "uptime_seconds": state.service.uptime_secs(),
    }))
}

/// POST /admin/reset-keys: Clear the exhausted set of every pool.
async fn reset_keys(State(state): State<AdminState>) -> Response {
    let registry = state.gateway.registry();
    let reset = registry.reset_all_exhausted();
    info!(reset, "admin reset of all exhausted keys");

    json_ok(serde_json::json!({
        "message": "All exhausted keys have been reset",
        "reset": reset,
        "key_pool": registry.global_stats(),
    }))
}

/// GET /admin/pools/{name}: One pool's snapshot and status.
async fn pool_status(State(state): State<AdminState>, Path(name): Path<String>) -> Response {
    match state.gateway.pool(&name) {
        Some(pool) => json_ok(serde_json::json!({
            "name": name,
            "pool": pool.health(),
        })),
        None => unknown_pool(&name),
    }
}

/// POST /admin/pools/{name}/reset: Clear one pool's exhausted set.
async fn reset_pool(State(state): State<AdminState>, Path(name): Path<String>) -> Response {
    match state.gateway.pool(&name) {
        Some(pool) => {
            let reset = pool.reset_exhausted();
            info!(pool = %name, reset, "admin reset of pool");
            json_ok(serde_json::json!({
                "name": name,
                "reset": reset,
                "pool": pool.health(),
            }))
        }
        None => unknown_pool(&name),
    }
}

fn unknown_pool(name: &str) -> Response {
    error_response(
        StatusCode::NOT_FOUND,
        "unknown_pool",
        &format!("unknown pool: {name}"),
        &request_id(),
    )
}
