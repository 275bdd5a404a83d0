//! HTTP proxy logic
//!
//! Turns an inbound `/{pool}/{*path}` request into an `UpstreamRequest`,
//! forwards it through the named pool, and maps the outcome to an HTTP
//! response. Upstream error statuses are returned verbatim, except 503,
//! which is reserved for pool depletion and reported as 502. Pool and
//! transport failures use the JSON error body.

use std::time::Instant;

use axum::body::Body;
use axum::http::{HeaderValue, Request, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use provider::{UpstreamError, UpstreamRequest, UpstreamResponse};
use tracing::{error, info, instrument, warn};

use crate::error::ForwardError;
use crate::gateway::Gateway;
use crate::metrics;
use crate::service::ServiceMetrics;

/// Largest request body accepted for forwarding.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// JSON error body: {"error":{"type":"...","message":"...","request_id":"req_..."}}
fn error_body(error_type: &str, message: &str, request_id: &str) -> serde_json::Value {
    serde_json::json!({
        "error": {
            "type": error_type,
            "message": message,
            "request_id": request_id,
        }
    })
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

/// JSON error response shared by the public and admin listeners.
pub fn error_response(
    status: StatusCode,
    error_type: &str,
    message: &str,
    request_id: &str,
) -> Response {
    json_response(status, error_body(error_type, message, request_id))
}

/// Proxy an inbound request through the named pool.
#[instrument(skip_all, fields(request_id = %request_id, pool = %pool_name, method = %request.method()))]
pub async fn proxy_request(
    gateway: &Gateway,
    service: &ServiceMetrics,
    pool_name: &str,
    request: Request<Body>,
    request_id: String,
) -> Response {
    let started = Instant::now();
    let _in_flight = service.begin_request();

    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(b) => b,
        Err(e) => {
            service.record_error();
            warn!(error = %e, "failed to read request body");
            let response = error_response(
                StatusCode::BAD_REQUEST,
                "invalid_request",
                &format!("invalid request body: {e}"),
                &request_id,
            );
            metrics::record_request(400, pool_name, started.elapsed().as_secs_f64());
            return response;
        }
    };

    let upstream_request = UpstreamRequest {
        method: parts.method,
        path_and_query: upstream_path_and_query(&parts.uri),
        headers: parts.headers,
        body,
    };

    let response = match gateway.forward(pool_name, &upstream_request).await {
        Ok(upstream) => upstream_response(upstream, &request_id),
        Err(err) => {
            service.record_error();
            if let Some(label) = err.metric_label() {
                metrics::record_upstream_error(label);
            }
            forward_error_response(err, &request_id)
        }
    };

    let status = response.status().as_u16();
    let elapsed = started.elapsed();
    metrics::record_request(status, pool_name, elapsed.as_secs_f64());
    info!(
        status,
        path = %upstream_request.path_and_query,
        duration_ms = elapsed.as_millis() as u64,
        "request completed"
    );
    response
}

/// Path and query to replay upstream: the inbound path minus its first
/// segment (the pool name).
pub fn upstream_path_and_query(uri: &Uri) -> String {
    let trimmed = uri.path().trim_start_matches('/');
    let rest = match trimmed.find('/') {
        Some(i) => &trimmed[i..],
        None => "/",
    };
    match uri.query() {
        Some(q) => format!("{rest}?{q}"),
        None => rest.to_string(),
    }
}

fn upstream_response(upstream: UpstreamResponse, request_id: &str) -> Response {
    let mut builder = Response::builder().status(upstream.status);
    for (name, value) in &upstream.headers {
        builder = builder.header(name, value);
    }
    builder
        .body(Body::from(upstream.body))
        .unwrap_or_else(|e| {
            error!(error = %e, "failed to build response from upstream");
            error_response(
                StatusCode::BAD_GATEWAY,
                "proxy_error",
                &format!("response build error: {e}"),
                request_id,
            )
        })
}

/// Map a forwarding failure to its HTTP response.
pub fn forward_error_response(err: ForwardError, request_id: &str) -> Response {
    match err {
        ForwardError::UnknownPool(name) => error_response(
            StatusCode::NOT_FOUND,
            "unknown_pool",
            &format!("unknown pool: {name}"),
            request_id,
        ),
        ForwardError::Pool(key_pool::Error::PoolExhausted { ref pool, snapshot }) => {
            error!(pool = %pool, exhausted = snapshot.exhausted, total = snapshot.total, "no usable credentials");
            let mut body = error_body("pool_exhausted", &err.to_string(), request_id);
            body["error"]["pool"] = serde_json::json!(snapshot);
            json_response(StatusCode::SERVICE_UNAVAILABLE, body)
        }
        ForwardError::Pool(key_pool::Error::AcquireTimeout { ref pool, waited_ms }) => {
            warn!(pool = %pool, waited_ms, "gave up waiting for a credential");
            let mut response = error_response(
                StatusCode::TOO_MANY_REQUESTS,
                "acquire_timeout",
                &err.to_string(),
                request_id,
            );
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
            response
        }
        ForwardError::Pool(key_pool::Error::Credential(ref msg)) => {
            error!(error = %msg, "credential error while forwarding");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                &err.to_string(),
                request_id,
            )
        }
        ForwardError::Upstream(UpstreamError::Status {
            status,
            content_type,
            body,
        }) => {
            warn!(status, "upstream returned error status");
            let status = match StatusCode::from_u16(status) {
                Ok(StatusCode::SERVICE_UNAVAILABLE) | Err(_) => StatusCode::BAD_GATEWAY,
                Ok(status) => status,
            };
            let mut response = (status, body).into_response();
            if let Some(ct) = content_type.and_then(|ct| HeaderValue::from_str(&ct).ok()) {
                response.headers_mut().insert(header::CONTENT_TYPE, ct);
            }
            response
        }
        ForwardError::Upstream(UpstreamError::Timeout(ref msg)) => {
            error!(error = %msg, "upstream timeout");
            error_response(
                StatusCode::GATEWAY_TIMEOUT,
                "upstream_timeout",
                &err.to_string(),
                request_id,
            )
        }
        ForwardError::Upstream(UpstreamError::Transport(ref msg)) => {
            error!(error = %msg, "upstream request failed");
            error_response(
                StatusCode::BAD_GATEWAY,
                "proxy_error",
                &err.to_string(),
                request_id,
            )
        }
    }
}
