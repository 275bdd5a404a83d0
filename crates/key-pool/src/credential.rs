//! Opaque upstream credential ("provider key")

use std::fmt;
use std::sync::Arc;

/// Number of leading characters kept when a credential is printed.
const VISIBLE_PREFIX: usize = 5;

/// An upstream credential. Identity is value equality of the token.
///
/// Cloning is cheap (shared `Arc<str>`). `Debug` and `Display` print a masked
/// form so credentials can be passed to `tracing` fields directly.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credential(Arc<str>);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Arc::from(token.into()))
    }

    /// Raw token for the upstream call (use sparingly)
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// First few characters followed by `...`, or `[REDACTED]` for short tokens.
    pub fn masked(&self) -> String {
        if self.0.chars().count() <= VISIBLE_PREFIX {
            return "[REDACTED]".to_string();
        }
        let prefix: String = self.0.chars().take(VISIBLE_PREFIX).collect();
        format!("{prefix}...")
    }
}

impl From<&str> for Credential {
    fn from(token: &str) -> Self {
        Self::new(token)
    }
}

impl From<String> for Credential {
    fn from(token: String) -> Self {
        Self::new(token)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential({})", self.masked())
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.masked())
    }
}
