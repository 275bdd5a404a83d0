//! HTTP provider: forwards opaque requests to an upstream base URL.
//!
//! The provider never builds provider-specific request bodies: it replays the
//! inbound method, path, headers and body against `base_url`, adds configured
//! static headers, and injects the pooled credential into `credential_header`.
//! Non-2xx responses come back as `UpstreamError::Status` so the pool can
//! classify them.

use crate::{
    ErrorClassification, ErrorClassifier, Provider, ProviderError, UpstreamError,
    UpstreamRequest, UpstreamResponse,
};
use bytes::{Bytes, BytesMut};
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Headers to strip before forwarding (hop-by-hop per RFC 2616 Section 13.5.1)
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Largest upstream response body read into memory.
pub const MAX_RESPONSE_BYTES: usize = 10 * 1024 * 1024;

/// Request headers the HTTP client computes itself for the upstream host.
const CLIENT_MANAGED_HEADERS: &[&str] = &["host", "content-length"];

/// Header injection rule (name + value pair from config).
#[derive(Debug, Clone)]
pub struct HeaderInjection {
    pub name: String,
    pub value: String,
}

/// Credential-injecting HTTP forwarder for one upstream service.
pub struct HttpProvider {
    id: String,
    client: reqwest::Client,
    base_url: String,
    credential_header: HeaderName,
    headers: Vec<HeaderInjection>,
    timeout: Duration,
    max_body_bytes: usize,
    classifier: Arc<dyn ErrorClassifier>,
}

impl HttpProvider {
    /// Create a provider for `base_url`.
    ///
    /// Fails if `base_url` is not http(s) or `credential_header` is not a
    /// valid header name. Static header injections are validated lazily and
    /// skipped with a warning, matching how the proxy has always treated them.
    pub fn new(
        id: impl Into<String>,
        client: reqwest::Client,
        base_url: &str,
        credential_header: &str,
        headers: Vec<HeaderInjection>,
        timeout: Duration,
        classifier: Arc<dyn ErrorClassifier>,
    ) -> Result<Self, ProviderError> {
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ProviderError::InvalidUrl(format!(
                "must start with http:// or https://, got: {base_url}"
            )));
        }
        let credential_header = HeaderName::from_str(credential_header)
            .map_err(|e| ProviderError::InvalidHeader(format!("{credential_header}: {e}")))?;

        Ok(Self {
            id: id.into(),
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credential_header,
            headers,
            timeout,
            max_body_bytes: MAX_RESPONSE_BYTES,
            classifier,
        })
    }

    /// Override the response body cap (default `MAX_RESPONSE_BYTES`).
    pub fn with_max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    /// Build the outbound header map: inbound headers minus hop-by-hop and
    /// client-managed ones, then static injections, then the credential.
    fn outbound_headers(
        &self,
        credential: &str,
        inbound: &HeaderMap,
    ) -> Result<HeaderMap, UpstreamError> {
        let mut headers = HeaderMap::new();
        for (name, value) in inbound {
            let name_str = name.as_str();
            if is_hop_by_hop(name_str)
                || CLIENT_MANAGED_HEADERS
                    .iter()
                    .any(|h| h.eq_ignore_ascii_case(name_str))
            {
                continue;
            }
            headers.append(name.clone(), value.clone());
        }

        for injection in &self.headers {
            let name = match HeaderName::from_str(&injection.name) {
                Ok(n) => n,
                Err(e) => {
                    warn!(header = %injection.name, error = %e, "skipping invalid header name");
                    continue;
                }
            };
            if name == reqwest::header::AUTHORIZATION {
                warn!(header = %injection.name, "refusing to overwrite authorization header");
                continue;
            }
            let value = match HeaderValue::from_str(&injection.value) {
                Ok(v) => v,
                Err(e) => {
                    warn!(header = %injection.name, error = %e, "skipping invalid header value");
                    continue;
                }
            };
            headers.insert(name, value);
        }

        let mut value = HeaderValue::from_str(credential).map_err(|e| {
            UpstreamError::Transport(format!("credential is not a valid header value: {e}"))
        })?;
        value.set_sensitive(true);
        headers.insert(self.credential_header.clone(), value);

        Ok(headers)
    }
}

impl Provider for HttpProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn call<'a>(
        &'a self,
        credential: &'a str,
        request: &'a UpstreamRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamResponse, UpstreamError>> + Send + 'a>> {
        Box::pin(async move {
            let headers = self.outbound_headers(credential, &request.headers)?;
            let url = format!("{}{}", self.base_url, request.path_and_query);

            let mut response = self
                .client
                .request(request.method.clone(), &url)
                .headers(headers)
                .timeout(self.timeout)
                .body(request.body.clone())
                .send()
                .await
                .map_err(map_reqwest_error)?;

            let status = response.status();
            if !status.is_success() {
                let content_type = response
                    .headers()
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_owned);
                let body = match read_body(&mut response, self.max_body_bytes).await {
                    Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                    Err(e) => format!("<unreadable upstream body: {e}>"),
                };
                debug!(provider = %self.id, status = status.as_u16(), "upstream returned error status");
                return Err(UpstreamError::Status {
                    status: status.as_u16(),
                    content_type,
                    body,
                });
            }

            let mut response_headers = HeaderMap::new();
            for (name, value) in response.headers() {
                if !is_hop_by_hop(name.as_str()) {
                    response_headers.append(name.clone(), value.clone());
                }
            }
            let body = read_body(&mut response, self.max_body_bytes).await?;

            Ok(UpstreamResponse {
                status: status.as_u16(),
                headers: response_headers,
                body,
            })
        })
    }

    fn classify_error(&self, error: &UpstreamError) -> ErrorClassification {
        self.classifier.classify(error)
    }
}

/// Read the response body, failing once it grows past `limit` bytes.
async fn read_body(response: &mut reqwest::Response, limit: usize) -> Result<Bytes, UpstreamError> {
    let too_large =
        || UpstreamError::Transport(format!("upstream response body exceeds {limit} bytes"));

    if let Some(len) = response.content_length() {
        if len > limit as u64 {
            return Err(too_large());
        }
    }

    let mut body = BytesMut::new();
    while let Some(chunk) = response.chunk().await.map_err(map_reqwest_error)? {
        if body.len() + chunk.len() > limit {
            return Err(too_large());
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body.freeze())
}

fn map_reqwest_error(e: reqwest::Error) -> UpstreamError {
    if e.is_timeout() {
        UpstreamError::Timeout(e.to_string())
    } else {
        UpstreamError::Transport(e.to_string())
    }
}

/// Check if a header is hop-by-hop (should be stripped before forwarding)
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::response::IntoResponse;
    use bytes::Bytes;

    /// Treats every 429 as quota exhaustion.
    struct StatusOnly;

    impl ErrorClassifier for StatusOnly {
        fn classify(&self, error: &UpstreamError) -> ErrorClassification {
            if error.status() == Some(429) {
                ErrorClassification::QuotaExceeded
            } else {
                ErrorClassification::Other
            }
        }
    }

    /// Start a mock upstream that echoes the request back as JSON, answers
    /// `/quota` with 429, sleeps on `/slow`, and returns 4 KiB bodies on
    /// `/large` (200) and `/large-error` (500).
    async fn start_upstream() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let app = axum::Router::new().fallback(|request: Request<Body>| async move {
                let path = request.uri().path().to_string();
                if path == "/quota" {
                    return (
                        StatusCode::TOO_MANY_REQUESTS,
                        [(axum::http::header::CONTENT_TYPE, "application/json")],
                        r#"{"error":{"message":"quota exceeded"}}"#,
                    )
                        .into_response();
                }
                if path == "/large" || path == "/large-error" {
                    let status = if path == "/large" {
                        StatusCode::OK
                    } else {
                        StatusCode::INTERNAL_SERVER_ERROR
                    };
                    return (status, "x".repeat(4096)).into_response();
                }
                if path == "/slow" {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }

                let mut headers_map = std::collections::BTreeMap::new();
                for (name, value) in request.headers() {
                    headers_map.insert(
                        name.to_string(),
                        value.to_str().unwrap_or("").to_string(),
                    );
                }
                let method = request.method().to_string();
                let query = request.uri().query().unwrap_or("").to_string();
                let body = axum::body::to_bytes(request.into_body(), 1024 * 1024)
                    .await
                    .unwrap();
                let headers_json = headers_map
                    .iter()
                    .map(|(k, v)| format!("{k:?}:{v:?}"))
                    .collect::<Vec<_>>()
                    .join(",");
                (
                    StatusCode::OK,
                    [(axum::http::header::CONTENT_TYPE, "application/json")],
                    format!(
                        r#"{{"method":{method:?},"path":{path:?},"query":{query:?},"body":{:?},"headers":{{{headers_json}}}}}"#,
                        String::from_utf8_lossy(&body)
                    ),
                )
                    .into_response()
            });
            axum::serve(listener, app).await.unwrap();
        });

        format!("http://{addr}")
    }

    fn provider(base_url: &str, headers: Vec<HeaderInjection>, timeout: Duration) -> HttpProvider {
        HttpProvider::new(
            "test",
            reqwest::Client::new(),
            base_url,
            "x-goog-api-key",
            headers,
            timeout,
            Arc::new(StatusOnly),
        )
        .unwrap()
    }

    fn request(path_and_query: &str, body: &'static str) -> UpstreamRequest {
        UpstreamRequest {
            method: reqwest::Method::POST,
            path_and_query: path_and_query.to_string(),
            headers: HeaderMap::new(),
            body: Bytes::from_static(body.as_bytes()),
        }
    }

    #[tokio::test]
    async fn injects_credential_and_forwards_body() {
        let url = start_upstream().await;
        let provider = provider(&url, vec![], Duration::from_secs(5));

        let response = provider
            .call("key-alpha", &request("/v1/generate?alt=json", "hello"))
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        let echoed = String::from_utf8(response.body.to_vec()).unwrap();
        assert!(echoed.contains(r#""x-goog-api-key":"key-alpha""#), "got: {echoed}");
        assert!(echoed.contains(r#""path":"/v1/generate""#), "got: {echoed}");
        assert!(echoed.contains(r#""query":"alt=json""#), "got: {echoed}");
        assert!(echoed.contains(r#""body":"hello""#), "got: {echoed}");
    }

    #[tokio::test]
    async fn credential_overrides_client_supplied_header() {
        let url = start_upstream().await;
        let provider = provider(&url, vec![], Duration::from_secs(5));

        let mut req = request("/v1/generate", "");
        req.headers
            .insert("x-goog-api-key", HeaderValue::from_static("client-key"));
        let response = provider.call("pooled-key", &req).await.unwrap();

        let echoed = String::from_utf8(response.body.to_vec()).unwrap();
        assert!(echoed.contains(r#""x-goog-api-key":"pooled-key""#), "got: {echoed}");
        assert!(!echoed.contains("client-key"), "got: {echoed}");
    }

    #[tokio::test]
    async fn strips_hop_by_hop_and_injects_static_headers() {
        let url = start_upstream().await;
        let provider = provider(
            &url,
            vec![
                HeaderInjection {
                    name: "x-custom".into(),
                    value: "injected".into(),
                },
                HeaderInjection {
                    name: "authorization".into(),
                    value: "Bearer SHOULD-NOT-APPEAR".into(),
                },
                HeaderInjection {
                    name: "invalid header name".into(),
                    value: "v".into(),
                },
            ],
            Duration::from_secs(5),
        );

        let mut req = request("/echo", "");
        req.headers
            .insert("proxy-authorization", HeaderValue::from_static("secret"));
        req.headers
            .insert("authorization", HeaderValue::from_static("Bearer tenant"));
        let response = provider.call("k", &req).await.unwrap();

        let echoed = String::from_utf8(response.body.to_vec()).unwrap();
        assert!(echoed.contains(r#""x-custom":"injected""#), "got: {echoed}");
        assert!(echoed.contains(r#""authorization":"Bearer tenant""#), "got: {echoed}");
        assert!(!echoed.contains("SHOULD-NOT-APPEAR"), "got: {echoed}");
        assert!(!echoed.contains("proxy-authorization"), "got: {echoed}");
    }

    #[tokio::test]
    async fn non_success_status_becomes_status_error() {
        let url = start_upstream().await;
        let provider = provider(&url, vec![], Duration::from_secs(5));

        let err = provider
            .call("k", &request("/quota", ""))
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(429));
        assert!(err.message().contains("quota exceeded"));
        match &err {
            UpstreamError::Status { content_type, .. } => {
                assert_eq!(content_type.as_deref(), Some("application/json"));
            }
            other => panic!("expected status error, got {other:?}"),
        }
        assert_eq!(
            provider.classify_error(&err),
            ErrorClassification::QuotaExceeded
        );
    }

    #[tokio::test]
    async fn slow_upstream_becomes_timeout_error() {
        let url = start_upstream().await;
        let provider = provider(&url, vec![], Duration::from_millis(100));

        let err = provider
            .call("k", &request("/slow", ""))
            .await
            .unwrap_err();

        assert!(matches!(err, UpstreamError::Timeout(_)), "got: {err:?}");
        assert_eq!(provider.classify_error(&err), ErrorClassification::Other);
    }

    #[tokio::test]
    async fn oversized_response_body_is_rejected() {
        let url = start_upstream().await;
        let provider = provider(&url, vec![], Duration::from_secs(5)).with_max_body_bytes(1024);

        let err = provider
            .call("k", &request("/large", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::Transport(_)), "got: {err:?}");
        assert!(err.message().contains("exceeds 1024 bytes"), "got: {err:?}");

        let ok = provider
            .call("k", &request("/echo", ""))
            .await
            .unwrap();
        assert_eq!(ok.status, 200);
    }

    #[tokio::test]
    async fn oversized_error_body_keeps_status() {
        let url = start_upstream().await;
        let provider = provider(&url, vec![], Duration::from_secs(5)).with_max_body_bytes(1024);

        let err = provider
            .call("k", &request("/large-error", ""))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(500));
        assert!(err.message().len() < 1024, "got: {}", err.message());
        assert!(err.message().contains("exceeds 1024 bytes"));
    }

    #[tokio::test]
    async fn unreachable_upstream_becomes_transport_error() {
        // Bind then drop to get a port nothing is listening on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let provider = provider(&format!("http://{addr}"), vec![], Duration::from_secs(2));
        let err = provider.call("k", &request("/", "")).await.unwrap_err();
        assert!(matches!(err, UpstreamError::Transport(_)), "got: {err:?}");
    }

    #[test]
    fn rejects_non_http_base_url() {
        let result = HttpProvider::new(
            "bad",
            reqwest::Client::new(),
            "generativelanguage.googleapis.com",
            "x-goog-api-key",
            vec![],
            Duration::from_secs(1),
            Arc::new(StatusOnly),
        );
        assert!(matches!(result, Err(ProviderError::InvalidUrl(_))));
    }

    #[test]
    fn rejects_invalid_credential_header() {
        let result = HttpProvider::new(
            "bad",
            reqwest::Client::new(),
            "https://example.com",
            "not a header",
            vec![],
            Duration::from_secs(1),
            Arc::new(StatusOnly),
        );
        assert!(matches!(result, Err(ProviderError::InvalidHeader(_))));
    }

    #[test]
    fn hop_by_hop_detection() {
        assert!(is_hop_by_hop("Connection"));
        assert!(is_hop_by_hop("TRANSFER-ENCODING"));
        assert!(is_hop_by_hop("keep-alive"));
        assert!(!is_hop_by_hop("Content-Type"));
        assert!(!is_hop_by_hop("x-goog-api-key"));
    }
}
