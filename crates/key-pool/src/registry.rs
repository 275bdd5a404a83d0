//! Process-wide registry of pools for aggregate reporting and bulk reset

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use tracing::info;

use crate::credential::Credential;
use crate::pool::{Pool, PoolHealth, PoolStatus};

/// Aggregate counts across every registered pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GlobalStats {
    pub instances: usize,
    pub total: usize,
    pub available: usize,
    pub in_use: usize,
    pub exhausted: usize,
    /// Worst status of any pool; unhealthy when nothing is registered
    pub status: PoolStatus,
    /// Per-pool health keyed by pool name. A repeated name gets a `#n` suffix.
    pub pools: BTreeMap<String, PoolHealth>,
}

/// Shared handle to the set of live pools.
///
/// Cloning is cheap and every clone sees the same pools, so the registry can
/// be handed to request handlers and admin routes alike. Pools are never
/// removed; they live as long as the process.
#[derive(Clone, Default)]
pub struct Registry {
    pools: Arc<RwLock<Vec<Arc<Pool>>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an existing pool.
    pub fn register(&self, pool: Arc<Pool>) {
        info!(pool = %pool.name(), "pool registered");
        self.pools
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(pool);
    }

    /// Build a pool with the default selector and register it.
    pub fn create_pool(&self, name: impl Into<String>, credentials: Vec<Credential>) -> Arc<Pool> {
        let pool = Arc::new(Pool::new(name, credentials));
        self.register(pool.clone());
        pool
    }

    /// First registered pool with this name.
    pub fn get(&self, name: &str) -> Option<Arc<Pool>> {
        self.read().iter().find(|p| p.name() == name).cloned()
    }

    /// All pools in registration order.
    pub fn pools(&self) -> Vec<Arc<Pool>> {
        self.read().clone()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Reset the exhausted set of every pool. Returns the number of
    /// credentials returned to rotation.
    pub fn reset_all_exhausted(&self) -> usize {
        let reset: usize = self.pools().iter().map(|p| p.reset_exhausted()).sum();
        info!(pools = self.len(), reset, "reset exhausted credentials in all pools");
        reset
    }

    /// Sum the snapshots of every registered pool.
    ///
    /// Each pool's snapshot is individually consistent; the aggregate is not
    /// one atomic view across pools.
    pub fn global_stats(&self) -> GlobalStats {
        let pools = self.pools();
        let mut stats = GlobalStats {
            instances: pools.len(),
            total: 0,
            available: 0,
            in_use: 0,
            exhausted: 0,
            status: if pools.is_empty() {
                PoolStatus::Unhealthy
            } else {
                PoolStatus::Healthy
            },
            pools: BTreeMap::new(),
        };

        for pool in &pools {
            let health = pool.health();
            stats.total += health.snapshot.total;
            stats.available += health.snapshot.available;
            stats.in_use += health.snapshot.in_use;
            stats.exhausted += health.snapshot.exhausted;
            stats.status = stats.status.max(health.status);

            let mut key = pool.name().to_string();
            let mut n = 2;
            while stats.pools.contains_key(&key) {
                key = format!("{}#{n}", pool.name());
                n += 1;
            }
            stats.pools.insert(key, health);
        }

        stats
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<Arc<Pool>>> {
        self.pools.read().unwrap_or_else(PoisonError::into_inner)
    }
}
