//! Quota detection for upstream failures
//!
//! A failure counts as quota exhaustion when its message contains one of the
//! configured substrings or its status is one of the configured codes.
//! Matching is case-sensitive: "Quota exceeded" does not match "quota".

use provider::{ErrorClassification, ErrorClassifier, UpstreamError};

/// Message substrings that indicate a credential ran out of quota.
pub const DEFAULT_QUOTA_PATTERNS: &[&str] = &["quota", "rate limit", "capacity"];

/// Status codes that indicate a credential ran out of quota.
pub const DEFAULT_QUOTA_STATUSES: &[u16] = &[429];

/// Configurable quota predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaClassifier {
    patterns: Vec<String>,
    statuses: Vec<u16>,
}

impl Default for QuotaClassifier {
    fn default() -> Self {
        Self::new(
            DEFAULT_QUOTA_PATTERNS.iter().map(|p| p.to_string()).collect(),
            DEFAULT_QUOTA_STATUSES.to_vec(),
        )
    }
}

impl QuotaClassifier {
    /// Empty patterns are dropped; they would match every message.
    pub fn new(patterns: Vec<String>, statuses: Vec<u16>) -> Self {
        Self {
            patterns: patterns.into_iter().filter(|p| !p.is_empty()).collect(),
            statuses,
        }
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn statuses(&self) -> &[u16] {
        &self.statuses
    }

    /// True when `message` contains a pattern or `status` is a quota status.
    pub fn is_quota_error(&self, status: Option<u16>, message: &str) -> bool {
        if let Some(status) = status
            && self.statuses.contains(&status)
        {
            return true;
        }
        self.patterns.iter().any(|p| message.contains(p.as_str()))
    }
}

impl ErrorClassifier for QuotaClassifier {
    fn classify(&self, error: &UpstreamError) -> ErrorClassification {
        if self.is_quota_error(error.status(), error.message()) {
            ErrorClassification::QuotaExceeded
        } else {
            ErrorClassification::Other
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(status: u16, body: &str) -> UpstreamError {
        UpstreamError::Status {
            status,
            content_type: None,
            body: body.into(),
        }
    }

    #[test]
    fn status_429_is_quota() {
        let c = QuotaClassifier::default();
        assert_eq!(
            c.classify(&status(429, "")),
            ErrorClassification::QuotaExceeded
        );
    }

    #[test]
    fn message_quota_is_quota() {
        let c = QuotaClassifier::default();
        assert_eq!(
            c.classify(&status(400, "quota exceeded for project")),
            ErrorClassification::QuotaExceeded
        );
    }

    #[test]
    fn message_rate_limit_is_quota() {
        let c = QuotaClassifier::default();
        assert!(c.is_quota_error(None, "hit the rate limit, slow down"));
    }

    #[test]
    fn message_capacity_is_quota() {
        let c = QuotaClassifier::default();
        assert!(c.is_quota_error(Some(503), "model is over capacity"));
    }

    #[test]
    fn matching_is_case_sensitive() {
        let c = QuotaClassifier::default();
        assert!(!c.is_quota_error(Some(400), "Quota exceeded"));
        assert!(!c.is_quota_error(Some(400), "RATE LIMIT"));
    }

    #[test]
    fn unrelated_error_is_other() {
        let c = QuotaClassifier::default();
        assert_eq!(
            c.classify(&status(500, "internal server error")),
            ErrorClassification::Other
        );
    }

    #[test]
    fn empty_message_without_status_is_other() {
        let c = QuotaClassifier::default();
        assert!(!c.is_quota_error(None, ""));
    }

    #[test]
    fn transport_message_is_checked() {
        let c = QuotaClassifier::default();
        assert_eq!(
            c.classify(&UpstreamError::Transport("connection refused".into())),
            ErrorClassification::Other
        );
        assert_eq!(
            c.classify(&UpstreamError::Timeout("capacity wait exceeded".into())),
            ErrorClassification::QuotaExceeded
        );
    }

    #[test]
    fn custom_patterns_replace_defaults() {
        let c = QuotaClassifier::new(vec!["RESOURCE_EXHAUSTED".into()], vec![]);
        assert!(c.is_quota_error(Some(400), r#"{"status":"RESOURCE_EXHAUSTED"}"#));
        assert!(!c.is_quota_error(Some(429), "quota"));
    }

    #[test]
    fn empty_patterns_are_dropped() {
        let c = QuotaClassifier::new(vec!["".into(), "quota".into()], vec![]);
        assert_eq!(c.patterns(), &["quota".to_string()]);
        assert!(!c.is_quota_error(None, "anything"));
    }

    #[test]
    fn defaults() {
        let c = QuotaClassifier::default();
        assert_eq!(c.patterns(), &["quota", "rate limit", "capacity"]);
        assert_eq!(c.statuses(), &[429]);
    }
}
