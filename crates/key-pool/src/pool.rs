//! Pool state and credential acquisition
//!
//! A pool owns a fixed, ordered list of credentials and partitions it into
//! in-use, exhausted and available (everything else). The two explicit sets
//! live behind a single mutex, so every operation is observed either fully
//! applied or not at all.
//!
//! `acquire()` never holds the lock while waiting. When every non-exhausted
//! credential is checked out it parks on a `Notify` that is signalled by
//! `release`, `mark_exhausted` and `reset_exhausted`, then re-runs the
//! non-blocking attempt. Waiters are woken together and race for the freed
//! credential; there is no FIFO ordering among them.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::credential::Credential;
use crate::error::{Error, Result};
use crate::select::{RandomSelector, Selector};

/// Point-in-time credential counts for one pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolSnapshot {
    pub total: usize,
    pub available: usize,
    pub in_use: usize,
    pub exhausted: usize,
}

impl PoolSnapshot {
    /// Health derived from the counts.
    ///
    /// healthy: nothing exhausted; degraded: some exhausted; unhealthy: empty
    /// pool or everything exhausted.
    pub fn status(&self) -> PoolStatus {
        if self.total == 0 || self.exhausted >= self.total {
            PoolStatus::Unhealthy
        } else if self.exhausted > 0 {
            PoolStatus::Degraded
        } else {
            PoolStatus::Healthy
        }
    }
}

/// Pool health label, ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl PoolStatus {
    /// Status label for health/logging.
    pub fn label(&self) -> &'static str {
        match self {
            PoolStatus::Healthy => "healthy",
            PoolStatus::Degraded => "degraded",
            PoolStatus::Unhealthy => "unhealthy",
        }
    }
}

/// Snapshot plus derived status, as reported by health and admin endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolHealth {
    pub status: PoolStatus,
    #[serde(flatten)]
    pub snapshot: PoolSnapshot,
}

#[derive(Debug, Default)]
struct PoolSets {
    in_use: HashSet<Credential>,
    exhausted: HashSet<Credential>,
}

/// Outcome of one non-blocking acquisition attempt.
enum Attempt {
    Acquired(Credential),
    /// Nothing available but some credential is merely in use
    Busy,
    /// Nothing available and nothing ever will be until a reset
    Depleted(PoolSnapshot),
}

/// A managed set of credentials for one upstream group.
pub struct Pool {
    name: String,
    all: Vec<Credential>,
    sets: Mutex<PoolSets>,
    changed: Notify,
    selector: Box<dyn Selector>,
}

impl Pool {
    /// Create a pool that selects uniformly at random among available credentials.
    pub fn new(name: impl Into<String>, credentials: Vec<Credential>) -> Self {
        Self::with_selector(name, credentials, Box::new(RandomSelector))
    }

    /// Create a pool with an explicit selection strategy.
    ///
    /// Duplicate credentials are collapsed (identity is value equality);
    /// first-seen order is kept.
    pub fn with_selector(
        name: impl Into<String>,
        credentials: Vec<Credential>,
        selector: Box<dyn Selector>,
    ) -> Self {
        let name = name.into();
        let supplied = credentials.len();
        let mut seen = HashSet::with_capacity(supplied);
        let all: Vec<Credential> = credentials
            .into_iter()
            .filter(|c| seen.insert(c.clone()))
            .collect();
        if all.len() < supplied {
            warn!(
                pool = %name,
                duplicates = supplied - all.len(),
                "ignoring duplicate credentials"
            );
        }
        info!(pool = %name, credentials = all.len(), "pool initialized");

        let pool = Self {
            name,
            all,
            sets: Mutex::new(PoolSets::default()),
            changed: Notify::new(),
            selector,
        };
        pool.publish_gauges(&pool.snapshot());
        pool
    }

    /// Pool name (usually the upstream group it fronts).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All credentials in configuration order.
    pub fn credentials(&self) -> &[Credential] {
        &self.all
    }

    /// Consistent point-in-time counts.
    pub fn snapshot(&self) -> PoolSnapshot {
        let sets = self.lock();
        self.snapshot_locked(&sets)
    }

    /// Snapshot plus derived status.
    pub fn health(&self) -> PoolHealth {
        let snapshot = self.snapshot();
        PoolHealth {
            status: snapshot.status(),
            snapshot,
        }
    }

    /// Check out an available credential without waiting.
    ///
    /// Returns `None` when every credential is in use or exhausted.
    pub fn try_acquire(&self) -> Option<Credential> {
        match self.attempt() {
            Attempt::Acquired(credential) => Some(credential),
            Attempt::Busy | Attempt::Depleted(_) => None,
        }
    }

    /// Check out a credential, waiting while every usable one is in use.
    ///
    /// Fails immediately with `PoolExhausted` when the pool is empty or every
    /// credential is exhausted. Otherwise waits indefinitely; use
    /// `acquire_timeout` for a bounded wait. Dropping the returned future
    /// cancels the wait without checking anything out.
    pub async fn acquire(&self) -> Result<Credential> {
        loop {
            // Register interest before looking so a release between the
            // attempt and the await is not missed.
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.attempt() {
                Attempt::Acquired(credential) => return Ok(credential),
                Attempt::Depleted(snapshot) => {
                    return Err(Error::PoolExhausted {
                        pool: self.name.clone(),
                        snapshot,
                    });
                }
                Attempt::Busy => {
                    debug!(pool = %self.name, "all usable credentials in use, waiting");
                }
            }

            notified.await;
        }
    }

    /// `acquire` with a caller-supplied deadline.
    pub async fn acquire_timeout(&self, timeout: Duration) -> Result<Credential> {
        let started = Instant::now();
        match tokio::time::timeout(timeout, self.acquire()).await {
            Ok(result) => result,
            Err(_) => {
                let waited_ms = started.elapsed().as_millis() as u64;
                warn!(pool = %self.name, waited_ms, "timed out waiting for a credential");
                Err(Error::AcquireTimeout {
                    pool: self.name.clone(),
                    waited_ms,
                })
            }
        }
    }

    /// Return a credential to the pool. No-op if it is not currently in use.
    pub fn release(&self, credential: &Credential) {
        let mut sets = self.lock();
        if !sets.in_use.remove(credential) {
            debug!(pool = %self.name, credential = %credential, "release of credential not in use ignored");
            return;
        }
        let snapshot = self.snapshot_locked(&sets);
        drop(sets);

        debug!(pool = %self.name, credential = %credential, "credential released");
        self.publish_gauges(&snapshot);
        self.changed.notify_waiters();
    }

    /// Retire a credential until the next reset.
    ///
    /// Removes it from in-use unconditionally. When this leaves no usable
    /// credential, a critical depletion event is logged and counted; waiters
    /// are woken so they fail fast instead of waiting forever.
    pub fn mark_exhausted(&self, credential: &Credential) {
        if !self.all.contains(credential) {
            debug!(pool = %self.name, credential = %credential, "ignoring unknown credential");
            return;
        }

        let mut sets = self.lock();
        sets.in_use.remove(credential);
        let newly_exhausted = sets.exhausted.insert(credential.clone());
        let snapshot = self.snapshot_locked(&sets);
        drop(sets);

        if newly_exhausted {
            warn!(pool = %self.name, credential = %credential, "credential marked as exhausted");
            metrics::counter!("key_pool_exhausted_total", "pool" => self.name.clone())
                .increment(1);

            if snapshot.exhausted == snapshot.total {
                error!(
                    pool = %self.name,
                    credentials = snapshot.total,
                    "CRITICAL: all credentials in pool are exhausted"
                );
                metrics::counter!("key_pool_depletions_total", "pool" => self.name.clone())
                    .increment(1);
            }
        }

        self.publish_gauges(&snapshot);
        self.changed.notify_waiters();
    }

    /// Clear the exhausted set. In-use credentials are untouched.
    ///
    /// Returns how many credentials were returned to rotation.
    pub fn reset_exhausted(&self) -> usize {
        let mut sets = self.lock();
        let reset = sets.exhausted.len();
        sets.exhausted.clear();
        let snapshot = self.snapshot_locked(&sets);
        drop(sets);

        info!(pool = %self.name, reset, "reset exhausted credentials");
        self.publish_gauges(&snapshot);
        self.changed.notify_waiters();
        reset
    }

    /// One non-blocking attempt under the lock.
    fn attempt(&self) -> Attempt {
        let mut sets = self.lock();
        let candidates: Vec<&Credential> = self
            .all
            .iter()
            .filter(|c| !sets.in_use.contains(*c) && !sets.exhausted.contains(*c))
            .collect();

        if candidates.is_empty() {
            if sets.exhausted.len() >= self.all.len() {
                return Attempt::Depleted(self.snapshot_locked(&sets));
            }
            return Attempt::Busy;
        }

        let index = self.selector.pick(candidates.len()).min(candidates.len() - 1);
        let credential = candidates[index].clone();
        sets.in_use.insert(credential.clone());
        let snapshot = self.snapshot_locked(&sets);
        drop(sets);

        debug!(pool = %self.name, credential = %credential, "credential acquired");
        self.publish_gauges(&snapshot);
        Attempt::Acquired(credential)
    }

    fn snapshot_locked(&self, sets: &PoolSets) -> PoolSnapshot {
        let available = self
            .all
            .iter()
            .filter(|c| !sets.in_use.contains(*c) && !sets.exhausted.contains(*c))
            .count();
        PoolSnapshot {
            total: self.all.len(),
            available,
            in_use: sets.in_use.len(),
            exhausted: sets.exhausted.len(),
        }
    }

    fn publish_gauges(&self, snapshot: &PoolSnapshot) {
        for (state, value) in [
            ("available", snapshot.available),
            ("in_use", snapshot.in_use),
            ("exhausted", snapshot.exhausted),
        ] {
            metrics::gauge!("key_pool_credentials", "pool" => self.name.clone(), "state" => state)
                .set(value as f64);
        }
    }

    /// The critical sections never panic, so a poisoned lock still holds a
    /// consistent partition.
    fn lock(&self) -> MutexGuard<'_, PoolSets> {
        self.sets.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
