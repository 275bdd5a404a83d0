//! Provider abstraction for upstream generative-AI calls
//!
//! Defines the `Provider` trait that decouples the credential pool from the
//! mechanics of talking to an upstream API. The pool hands a credential to a
//! provider, the provider performs exactly one upstream call with it, and the
//! provider's `ErrorClassifier` decides whether a failure means the credential
//! ran out of quota or something else went wrong.
//!
//! `HttpProvider` is the only implementation: it forwards opaque request
//! bodies to a configured base URL and injects the credential as a header.

pub mod http;

pub use http::{HeaderInjection, HttpProvider, is_hop_by_hop};

use bytes::Bytes;
use reqwest::header::HeaderMap;
use std::future::Future;
use std::pin::Pin;

/// Classification of upstream errors to determine credential disposition.
///
/// - QuotaExceeded retires the credential and retries on another one
/// - Other releases the credential and propagates the error to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClassification {
    /// Credential has no remaining upstream quota
    QuotaExceeded,
    /// Any other failure; the credential is still believed healthy
    Other,
}

impl ErrorClassification {
    /// Label for logging and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorClassification::QuotaExceeded => "quota",
            ErrorClassification::Other => "other",
        }
    }
}

/// Failure of a single upstream call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UpstreamError {
    /// Upstream answered with a non-success status.
    #[error("upstream returned {status}: {body}")]
    Status {
        status: u16,
        content_type: Option<String>,
        body: String,
    },

    #[error("upstream timeout: {0}")]
    Timeout(String),

    #[error("upstream transport error: {0}")]
    Transport(String),
}

impl UpstreamError {
    /// HTTP status reported by upstream, if the call got that far.
    pub fn status(&self) -> Option<u16> {
        match self {
            UpstreamError::Status { status, .. } => Some(*status),
            UpstreamError::Timeout(_) | UpstreamError::Transport(_) => None,
        }
    }

    /// Error message used by classifiers (the response body for status errors).
    pub fn message(&self) -> &str {
        match self {
            UpstreamError::Status { body, .. } => body,
            UpstreamError::Timeout(msg) | UpstreamError::Transport(msg) => msg,
        }
    }

    /// Label for the upstream error metric.
    pub fn kind(&self) -> &'static str {
        match self {
            UpstreamError::Status { .. } => "status",
            UpstreamError::Timeout(_) => "timeout",
            UpstreamError::Transport(_) => "transport",
        }
    }
}

/// Errors constructing a provider.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("invalid header name: {0}")]
    InvalidHeader(String),

    #[error("invalid upstream url: {0}")]
    InvalidUrl(String),
}

/// Pure predicate deciding whether an upstream failure means quota exhaustion.
///
/// Kept behind a trait so the matching rules can be swapped without touching
/// the pool or the provider.
pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, error: &UpstreamError) -> ErrorClassification;
}

/// An upstream request, kept intact so it can be replayed on another credential.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: reqwest::Method,
    /// Path and query appended to the provider's base URL (e.g. `/v1/models?x=1`)
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// A successful upstream response.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Abstraction over one upstream generative-AI service.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn Provider>`).
pub trait Provider: Send + Sync {
    /// Identifier for logging (usually the pool name)
    fn id(&self) -> &str;

    /// Perform exactly one upstream call authenticated with `credential`.
    fn call<'a>(
        &'a self,
        credential: &'a str,
        request: &'a UpstreamRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamResponse, UpstreamError>> + Send + 'a>>;

    /// Classify an upstream failure for the credential pool.
    fn classify_error(&self, error: &UpstreamError) -> ErrorClassification;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_error_exposes_status_and_body() {
        let err = UpstreamError::Status {
            status: 429,
            content_type: Some("application/json".into()),
            body: r#"{"error":"quota"}"#.into(),
        };
        assert_eq!(err.status(), Some(429));
        assert_eq!(err.message(), r#"{"error":"quota"}"#);
        assert_eq!(err.kind(), "status");
    }

    #[test]
    fn transport_errors_have_no_status() {
        let timeout = UpstreamError::Timeout("deadline elapsed".into());
        let transport = UpstreamError::Transport("connection refused".into());
        assert_eq!(timeout.status(), None);
        assert_eq!(transport.status(), None);
        assert_eq!(timeout.message(), "deadline elapsed");
        assert_eq!(transport.kind(), "transport");
    }

    #[test]
    fn classification_labels() {
        assert_eq!(ErrorClassification::QuotaExceeded.label(), "quota");
        assert_eq!(ErrorClassification::Other.label(), "other");
    }
}
