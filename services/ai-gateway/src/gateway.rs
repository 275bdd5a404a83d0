//! Pool routing: maps a pool name to its credential pool and upstream provider

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use key_pool::{DispatchError, Pool, Registry, dispatch};
use provider::{
    ErrorClassification, ErrorClassifier, HttpProvider, Provider, UpstreamError, UpstreamRequest,
    UpstreamResponse,
};
use tracing::info;

use crate::config::Config;
use crate::error::{Error, ForwardError, Result};
use crate::metrics;

/// A named pool and the provider its credentials authenticate against.
struct Route {
    pool: Arc<Pool>,
    provider: Arc<dyn Provider>,
}

/// Every configured pool, reachable by name.
pub struct Gateway {
    registry: Registry,
    routes: HashMap<String, Route>,
    acquire_timeout: Option<Duration>,
}

impl Gateway {
    pub fn new(registry: Registry, acquire_timeout: Option<Duration>) -> Self {
        Self {
            registry,
            routes: HashMap::new(),
            acquire_timeout,
        }
    }

    /// Build one pool and one `HttpProvider` per `[[pools]]` entry.
    ///
    /// Credentials are read once here; a pool with no credentials is still
    /// created so that requests to it fail fast with `pool_exhausted`.
    pub fn from_config(config: &Config, client: reqwest::Client, registry: Registry) -> Result<Self> {
        let classifier: Arc<dyn ErrorClassifier> = Arc::new(config.quota.classifier());
        let mut gateway = Self::new(registry, config.proxy.acquire_timeout());

        for pool_config in &config.pools {
            let credentials = key_pool::resolve(
                &pool_config.credentials_env,
                pool_config.credentials_file.as_deref(),
            )
            .map_err(|source| Error::Credentials {
                pool: pool_config.name.clone(),
                source,
            })?;

            let provider = HttpProvider::new(
                pool_config.name.clone(),
                client.clone(),
                &pool_config.upstream_url,
                &pool_config.credential_header,
                pool_config.headers.iter().map(Into::into).collect(),
                config.proxy.timeout(),
                classifier.clone(),
            )
            .map_err(|source| Error::Provider {
                pool: pool_config.name.clone(),
                source,
            })?;

            let pool = Arc::new(Pool::new(pool_config.name.clone(), credentials));
            info!(
                pool = %pool_config.name,
                upstream_url = %pool_config.upstream_url,
                credentials = pool.credentials().len(),
                "route configured"
            );
            gateway.add_route(pool, Arc::new(provider));
        }

        Ok(gateway)
    }

    /// Register `pool` and route its name to `provider`.
    pub fn add_route(&mut self, pool: Arc<Pool>, provider: Arc<dyn Provider>) {
        self.registry.register(pool.clone());
        self.routes
            .insert(pool.name().to_string(), Route { pool, provider });
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn pool(&self, name: &str) -> Option<&Arc<Pool>> {
        self.routes.get(name).map(|r| &r.pool)
    }

    /// Forward `request` through the named pool, rotating credentials on
    /// quota errors.
    pub async fn forward(
        &self,
        pool_name: &str,
        request: &UpstreamRequest,
    ) -> std::result::Result<UpstreamResponse, ForwardError> {
        let route = self
            .routes
            .get(pool_name)
            .ok_or_else(|| ForwardError::UnknownPool(pool_name.to_string()))?;
        let upstream = route.provider.as_ref();

        let classify = |error: &UpstreamError| {
            let classification = upstream.classify_error(error);
            if classification == ErrorClassification::QuotaExceeded {
                metrics::record_upstream_error("quota");
            }
            classification
        };

        dispatch(&route.pool, self.acquire_timeout, classify, |credential| async move {
            upstream.call(credential.expose(), request).await
        })
        .await
        .map_err(|e| match e {
            DispatchError::Pool(e) => ForwardError::Pool(e),
            DispatchError::Upstream(e) => ForwardError::Upstream(e),
        })
    }
}
