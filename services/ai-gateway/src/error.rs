//! Service-specific error types

use provider::{ProviderError, UpstreamError};
use thiserror::Error;

/// Startup errors while turning configuration into live pools and providers.
#[derive(Error, Debug)]
pub enum Error {
    #[error("pool {pool}: {source}")]
    Provider {
        pool: String,
        #[source]
        source: ProviderError,
    },

    #[error("pool {pool}: {source}")]
    Credentials {
        pool: String,
        #[source]
        source: key_pool::Error,
    },
}

/// Result alias using service Error
pub type Result<T> = std::result::Result<T, Error>;

/// Per-request forwarding failures. The proxy handler maps each variant to an
/// HTTP response; none of them propagate further.
#[derive(Error, Debug)]
pub enum ForwardError {
    #[error("unknown pool: {0}")]
    UnknownPool(String),

    #[error(transparent)]
    Pool(#[from] key_pool::Error),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

impl ForwardError {
    /// Label for the upstream error metric, if this failure counts as one.
    pub fn metric_label(&self) -> Option<&'static str> {
        match self {
            ForwardError::UnknownPool(_) => None,
            ForwardError::Pool(key_pool::Error::PoolExhausted { .. }) => Some("pool_exhausted"),
            ForwardError::Pool(key_pool::Error::AcquireTimeout { .. }) => Some("acquire_timeout"),
            ForwardError::Pool(key_pool::Error::Credential(_)) => None,
            ForwardError::Upstream(e) => Some(e.kind()),
        }
    }
}
