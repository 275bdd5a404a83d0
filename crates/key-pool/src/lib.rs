//! Credential pool and admission control for upstream API keys
//!
//! Holds a fixed list of interchangeable provider keys and hands each one to
//! at most one in-flight upstream call at a time. Keys that hit their quota
//! are retired until an operator resets them.
//!
//! Credential lifecycle:
//! 1. Loaded at startup from an environment variable or file → `available`
//! 2. Checked out by `acquire()` (random pick) → `in_use`
//! 3. Call succeeds or fails for a non-quota reason → back to `available`
//! 4. Call fails with a quota error → `exhausted`, caller retries on another key
//! 5. Operator reset → every `exhausted` key back to `available`
//!
//! When every usable key is in use, `acquire()` waits for a release. When
//! every key is exhausted (or there are none), it fails immediately.

pub mod credential;
pub mod dispatch;
pub mod error;
pub mod pool;
pub mod quota;
pub mod registry;
pub mod select;
pub mod store;

pub use credential::Credential;
pub use dispatch::{DispatchError, dispatch};
pub use error::{Error, Result};
pub use pool::{Pool, PoolHealth, PoolSnapshot, PoolStatus};
pub use quota::{DEFAULT_QUOTA_PATTERNS, DEFAULT_QUOTA_STATUSES, QuotaClassifier};
pub use registry::{GlobalStats, Registry};
pub use select::{FirstSelector, RandomSelector, Selector};
pub use store::{CredentialSource, parse_list, resolve};
