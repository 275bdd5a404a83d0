//! AI Gateway
//!
//! Single-binary Rust service that:
//! 1. Loads pools of interchangeable provider API keys from env vars or files
//! 2. Forwards `/{pool}/{*path}` requests upstream with one key per in-flight call
//! 3. Retires keys that hit their quota and retries on another
//! 4. Serves health, metrics and an admin API for stats and key resets

mod admin;
mod config;
mod error;
mod gateway;
mod metrics;
mod proxy;
mod service;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::{Context, Result};
use axum::Router;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use key_pool::{PoolStatus, Registry};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::admin::{AdminState, build_admin_router};
use crate::config::Config;
use crate::gateway::Gateway;
use crate::service::{DRAIN_TIMEOUT, ServiceMetrics};

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    gateway: Arc<Gateway>,
    service: ServiceMetrics,
    prometheus: PrometheusHandle,
}

/// Build the public router with all routes and shared state.
///
/// A concurrency limit layer caps in-flight requests at `max_connections`.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/{pool}/{*path}", any(proxy_handler))
        .fallback(not_found_handler)
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs, filter from LOG_LEVEL then RUST_LOG, default info
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting ai-gateway");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle = metrics::install_recorder();

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.proxy.listen_addr,
        admin_addr = %config.admin.listen_addr,
        pools = config.pools.len(),
        acquire_timeout_secs = ?config.proxy.acquire_timeout_secs,
        "configuration loaded"
    );
    if config.admin.api_key.is_none() {
        warn!("no admin key configured, admin API will reject every request");
    }

    let registry = Registry::new();
    let gateway = Gateway::from_config(&config, reqwest::Client::new(), registry.clone())
        .context("failed to build pools")?;
    let gateway = Arc::new(gateway);

    let stats = registry.global_stats();
    if stats.status == PoolStatus::Unhealthy {
        warn!(
            total = stats.total,
            exhausted = stats.exhausted,
            "at least one pool has no usable credentials"
        );
    }

    let service = ServiceMetrics::new();

    let app = build_router(
        AppState {
            gateway: gateway.clone(),
            service: service.clone(),
            prometheus: prometheus_handle,
        },
        config.proxy.max_connections,
    );
    let admin_app = build_admin_router(AdminState::new(
        gateway,
        config.admin.api_key.clone(),
        service.clone(),
    ));

    let listen_addr = config.proxy.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    let admin_addr = config.admin.listen_addr;
    let admin_listener = TcpListener::bind(admin_addr)
        .await
        .with_context(|| format!("failed to bind admin listener to {admin_addr}"))?;

    info!(addr = %listen_addr, admin_addr = %admin_addr, "accepting requests");

    // The drain deadline starts when the shutdown signal fires: both servers
    // are told to stop accepting, then raced against DRAIN_TIMEOUT.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let (admin_shutdown_tx, admin_shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });
    let admin_handle = tokio::spawn(async move {
        axum::serve(admin_listener, admin_app)
            .with_graceful_shutdown(async {
                let _ = admin_shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;

    let _ = shutdown_tx.send(());
    let _ = admin_shutdown_tx.send(());

    let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
        (server_handle.await, admin_handle.await)
    })
    .await;

    match drained {
        Ok(results) => {
            for (name, result) in [("public", results.0), ("admin", results.1)] {
                match result {
                    Ok(Ok(())) => info!(listener = name, "listener drained"),
                    Ok(Err(e)) => error!(listener = name, error = %e, "server error during shutdown"),
                    Err(e) => error!(listener = name, error = %e, "server task panicked"),
                }
            }
        }
        Err(_) => {
            let remaining = service.in_flight.load(Ordering::Relaxed);
            warn!(
                remaining,
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    info!("shutdown complete");
    Ok(())
}

/// Health endpoint: 200 while every pool has a non-exhausted credential,
/// 503 otherwise.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.gateway.registry().global_stats();
    let status_code = if stats.status == PoolStatus::Unhealthy {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    let body = serde_json::json!({
        "status": stats.status.label(),
        "global_stats": stats,
        "uptime_seconds": state.service.uptime_secs(),
        "requests_served": state.service.requests_total.load(Ordering::Relaxed),
        "errors_total": state.service.errors_total.load(Ordering::Relaxed),
        "in_flight": state.service.in_flight.load(Ordering::Relaxed),
    });

    (
        status_code,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Forward `/{pool}/{*path}` through the named pool.
async fn proxy_handler(
    State(state): State<AppState>,
    Path((pool, _path)): Path<(String, String)>,
    request: Request<Body>,
) -> Response {
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
    proxy::proxy_request(&state.gateway, &state.service, &pool, request, request_id).await
}

async fn not_found_handler(request: Request<Body>) -> Response {
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
    proxy::error_response(
        StatusCode::NOT_FOUND,
        "not_found",
        &format!("no route for {}; use /{{pool}}/{{path}}", request.uri().path()),
        &request_id,
    )
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
