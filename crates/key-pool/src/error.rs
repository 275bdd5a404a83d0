//! Error types for pool operations

use crate::pool::PoolSnapshot;

/// Errors from pool operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No usable credential exists: every credential is exhausted, or the
    /// pool has none. Waiting would never succeed.
    #[error(
        "pool exhausted: {pool} has no usable credentials ({} of {} exhausted)",
        .snapshot.exhausted,
        .snapshot.total
    )]
    PoolExhausted {
        pool: String,
        snapshot: PoolSnapshot,
    },

    /// Caller-supplied deadline elapsed while every usable credential was in use.
    #[error("timed out after {waited_ms}ms waiting for a credential from {pool}")]
    AcquireTimeout { pool: String, waited_ms: u64 },

    #[error("credential source error: {0}")]
    Credential(String),
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;
