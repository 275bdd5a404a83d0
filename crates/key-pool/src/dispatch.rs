//! Upstream call wrapper with credential rotation
//!
//! Acquires a credential, runs one upstream call with it, and disposes of the
//! credential according to the outcome:
//!
//! - success: release, return the value
//! - quota error: retire the credential, acquire another and retry
//! - any other error: release, return the error
//!
//! Retries are bounded by the pool size: each quota error retires one
//! credential, so the loop ends with `PoolExhausted` once none are left.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use provider::ErrorClassification;
use tracing::{debug, warn};

use crate::credential::Credential;
use crate::error::Error;
use crate::pool::Pool;

/// Failure of a dispatched call.
#[derive(Debug)]
pub enum DispatchError<E> {
    /// No credential could be obtained (exhausted pool or deadline).
    Pool(Error),
    /// The upstream call failed with a non-quota error.
    Upstream(E),
}

impl<E: fmt::Display> fmt::Display for DispatchError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::Pool(e) => write!(f, "{e}"),
            DispatchError::Upstream(e) => write!(f, "{e}"),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for DispatchError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DispatchError::Pool(e) => Some(e),
            DispatchError::Upstream(e) => Some(e),
        }
    }
}

/// A checked-out credential that goes back to the pool when dropped.
///
/// Covers the case where the dispatch future is dropped mid-call.
struct Lease<'a> {
    pool: &'a Pool,
    credential: Option<Credential>,
}

impl<'a> Lease<'a> {
    fn new(pool: &'a Pool, credential: Credential) -> Self {
        Self {
            pool,
            credential: Some(credential),
        }
    }

    fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    fn release(mut self) {
        if let Some(credential) = self.credential.take() {
            self.pool.release(&credential);
        }
    }

    fn retire(mut self) {
        if let Some(credential) = self.credential.take() {
            self.pool.mark_exhausted(&credential);
        }
    }
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        if let Some(credential) = self.credential.take() {
            debug!(pool = %self.pool.name(), credential = %credential, "call abandoned, releasing credential");
            self.pool.release(&credential);
        }
    }
}

/// Run `call` with a credential from `pool`, rotating away from credentials
/// that `classify` reports as out of quota.
///
/// `acquire_timeout` bounds each wait for a credential; `None` waits as long
/// as some usable credential exists.
pub async fn dispatch<T, E, F, Fut, C>(
    pool: &Pool,
    acquire_timeout: Option<Duration>,
    classify: C,
    mut call: F,
) -> Result<T, DispatchError<E>>
where
    F: FnMut(Credential) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> ErrorClassification,
    E: fmt::Display,
{
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        let credential = match acquire_timeout {
            Some(timeout) => pool.acquire_timeout(timeout).await,
            None => pool.acquire().await,
        }
        .map_err(DispatchError::Pool)?;

        let lease = Lease::new(pool, credential.clone());
        match call(credential).await {
            Ok(value) => {
                lease.release();
                return Ok(value);
            }
            Err(err) => match classify(&err) {
                ErrorClassification::QuotaExceeded => {
                    if let Some(credential) = lease.credential() {
                        warn!(
                            pool = %pool.name(),
                            credential = %credential,
                            attempt,
                            error = %err,
                            "quota error, retiring credential and retrying"
                        );
                    }
                    lease.retire();
                }
                ErrorClassification::Other => {
                    lease.release();
                    return Err(DispatchError::Upstream(err));
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::select::FirstSelector;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, PartialEq)]
    enum FakeError {
        Quota,
        Broken,
    }

    impl fmt::Display for FakeError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                FakeError::Quota => write!(f, "quota exceeded"),
                FakeError::Broken => write!(f, "broken"),
            }
        }
    }

    fn classify(err: &FakeError) -> ErrorClassification {
        match err {
            FakeError::Quota => ErrorClassification::QuotaExceeded,
            FakeError::Broken => ErrorClassification::Other,
        }
    }

    fn pool(tokens: &[&str]) -> Pool {
        Pool::with_selector(
            "test",
            tokens.iter().map(|t| Credential::from(*t)).collect(),
            Box::new(FirstSelector),
        )
    }

    #[tokio::test]
    async fn success_releases_credential() {
        let pool = pool(&["k1"]);
        let result: Result<String, DispatchError<FakeError>> =
            dispatch(&pool, None, classify, |c| async move {
                Ok(format!("used {}", c.expose()))
            })
            .await;
        assert_eq!(result.unwrap(), "used k1");
        assert_eq!(pool.snapshot().available, 1);
        assert_eq!(pool.snapshot().in_use, 0);
    }

    #[tokio::test]
    async fn single_quota_error_exhausts_pool() {
        let pool = pool(&["k1"]);
        let calls = Arc::new(Mutex::new(0));
        let result: Result<(), _> = dispatch(&pool, None, classify, |_c| {
            let calls = calls.clone();
            async move {
                *calls.lock().unwrap() += 1;
                Err(FakeError::Quota)
            }
        })
        .await;

        match result {
            Err(DispatchError::Pool(Error::PoolExhausted { snapshot, .. })) => {
                assert_eq!(snapshot.exhausted, 1);
            }
            other => panic!("expected PoolExhausted, got {other:?}"),
        }
        assert_eq!(*calls.lock().unwrap(), 1);
        assert_eq!(pool.snapshot().exhausted, 1);
        assert_eq!(pool.snapshot().in_use, 0);
    }

    #[tokio::test]
    async fn quota_error_retries_on_next_credential() {
        let pool = pool(&["k1", "k2"]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let result = dispatch(&pool, None, classify, |c| {
            let seen = seen.clone();
            async move {
                seen.lock().unwrap().push(c.expose().to_string());
                if c.expose() == "k1" {
                    Err(FakeError::Quota)
                } else {
                    Ok(c.expose().to_string())
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "k2");
        assert_eq!(*seen.lock().unwrap(), vec!["k1", "k2"]);
        let snapshot = pool.snapshot();
        assert_eq!(snapshot.exhausted, 1);
        assert_eq!(snapshot.available, 1);
        assert_eq!(snapshot.in_use, 0);
    }

    #[tokio::test]
    async fn other_error_releases_and_propagates() {
        let pool = pool(&["k1"]);
        let result: Result<(), _> =
            dispatch(&pool, None, classify, |_c| async { Err(FakeError::Broken) }).await;

        match result {
            Err(DispatchError::Upstream(err)) => assert_eq!(err, FakeError::Broken),
            other => panic!("expected upstream error, got {other:?}"),
        }
        let snapshot = pool.snapshot();
        assert_eq!(snapshot.available, 1);
        assert_eq!(snapshot.exhausted, 0);
    }

    #[tokio::test]
    async fn empty_pool_fails_without_calling() {
        let pool = pool(&[]);
        let calls = Arc::new(Mutex::new(0));
        let result: Result<(), DispatchError<FakeError>> = dispatch(&pool, None, classify, |_c| {
            let calls = calls.clone();
            async move {
                *calls.lock().unwrap() += 1;
                Ok(())
            }
        })
        .await;
        assert!(matches!(
            result,
            Err(DispatchError::Pool(Error::PoolExhausted { .. }))
        ));
        assert_eq!(*calls.lock().unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_timeout_surfaces_as_pool_error() {
        let pool = pool(&["k1"]);
        let _held = pool.try_acquire().unwrap();
        let result: Result<(), DispatchError<FakeError>> =
            dispatch(&pool, Some(Duration::from_millis(100)), classify, |_c| async {
                Ok(())
            })
            .await;
        assert!(matches!(
            result,
            Err(DispatchError::Pool(Error::AcquireTimeout { .. }))
        ));
    }

    #[tokio::test]
    async fn dropped_call_releases_credential() {
        let pool = Arc::new(pool(&["k1"]));
        let task = {
            let pool = pool.clone();
            tokio::spawn(async move {
                let _: Result<(), DispatchError<FakeError>> =
                    dispatch(&pool, None, classify, |_c| async {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        Ok(())
                    })
                    .await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(pool.snapshot().in_use, 1);

        task.abort();
        let _ = task.await;
        assert_eq!(pool.snapshot().in_use, 0);
        assert_eq!(pool.snapshot().available, 1);
    }

    #[test]
    fn display_passes_through() {
        let err: DispatchError<FakeError> = DispatchError::Upstream(FakeError::Broken);
        assert_eq!(err.to_string(), "broken");
        let err: DispatchError<FakeError> = DispatchError::Pool(Error::AcquireTimeout {
            pool: "p".into(),
            waited_ms: 10,
        });
        assert!(err.to_string().contains("timed out"));
    }
}
