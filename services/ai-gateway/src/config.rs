//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! Secrets never live in the TOML: the admin key comes from ADMIN_API_KEY or
//! `api_key_file`, and each pool's provider keys come from its
//! `credentials_env` variable or `credentials_file`.

use common::Secret;
use key_pool::{DEFAULT_QUOTA_PATTERNS, DEFAULT_QUOTA_STATUSES, QuotaClassifier};
use serde::Deserialize;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable holding the admin API key.
pub const ADMIN_KEY_ENV: &str = "ADMIN_API_KEY";

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub pools: Vec<PoolConfig>,
}

/// Public HTTP listener settings
#[derive(Debug, Deserialize)]
pub struct ProxyConfig {
    pub listen_addr: SocketAddr,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Upper bound on waiting for a free credential. Absent means wait as
    /// long as some credential is not exhausted.
    #[serde(default)]
    pub acquire_timeout_secs: Option<u64>,
}

impl ProxyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn acquire_timeout(&self) -> Option<Duration> {
        self.acquire_timeout_secs.map(Duration::from_secs)
    }
}

/// Admin listener settings
#[derive(Debug, Deserialize)]
pub struct AdminConfig {
    #[serde(default = "default_admin_addr")]
    pub listen_addr: SocketAddr,
    /// Path to a file containing the admin key (alternative to ADMIN_API_KEY)
    #[serde(default)]
    pub api_key_file: Option<PathBuf>,
    #[serde(skip)]
    pub api_key: Option<Secret<String>>,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_admin_addr(),
            api_key_file: None,
            api_key: None,
        }
    }
}

/// Quota predicate settings
#[derive(Debug, Deserialize)]
pub struct QuotaConfig {
    #[serde(default = "default_quota_patterns")]
    pub patterns: Vec<String>,
    #[serde(default = "default_quota_statuses")]
    pub statuses: Vec<u16>,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            patterns: default_quota_patterns(),
            statuses: default_quota_statuses(),
        }
    }
}

impl QuotaConfig {
    pub fn classifier(&self) -> QuotaClassifier {
        QuotaClassifier::new(self.patterns.clone(), self.statuses.clone())
    }
}

/// One credential pool and the upstream it fronts
#[derive(Debug, Deserialize)]
pub struct PoolConfig {
    pub name: String,
    pub upstream_url: String,
    #[serde(default = "default_credentials_env")]
    pub credentials_env: String,
    /// Read when `credentials_env` is unset
    #[serde(default)]
    pub credentials_file: Option<PathBuf>,
    #[serde(default = "default_credential_header")]
    pub credential_header: String,
    #[serde(default)]
    pub headers: Vec<HeaderInjection>,
}

/// Header to inject into proxied requests
#[derive(Debug, Clone, Deserialize)]
pub struct HeaderInjection {
    pub name: String,
    pub value: String,
}

impl From<&HeaderInjection> for provider::HeaderInjection {
    fn from(h: &HeaderInjection) -> Self {
        provider::HeaderInjection {
            name: h.name.clone(),
            value: h.value.clone(),
        }
    }
}

fn default_timeout() -> u64 {
    60
}

fn default_max_connections() -> usize {
    1000
}

fn default_admin_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9090))
}

fn default_quota_patterns() -> Vec<String> {
    DEFAULT_QUOTA_PATTERNS.iter().map(|p| p.to_string()).collect()
}

fn default_quota_statuses() -> Vec<u16> {
    DEFAULT_QUOTA_STATUSES.to_vec()
}

fn default_credentials_env() -> String {
    "GEMINI_API_KEYS".to_string()
}

fn default_credential_header() -> String {
    "x-goog-api-key".to_string()
}

impl Config {
    /// Load configuration from a TOML file, validate it, then overlay
    /// environment variables.
    ///
    /// Admin key resolution order:
    /// 1. ADMIN_API_KEY env var
    /// 2. api_key_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.validate()?;

        if let Ok(key) = std::env::var(ADMIN_KEY_ENV) {
            let key = key.trim().to_owned();
            if !key.is_empty() {
                config.admin.api_key = Some(Secret::new(key));
            }
        } else if let Some(ref key_file) = config.admin.api_key_file {
            let key = std::fs::read_to_string(key_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read api_key_file {}: {e}",
                    key_file.display()
                ))
            })?;
            let key = key.trim().to_owned();
            if !key.is_empty() {
                config.admin.api_key = Some(Secret::new(key));
            }
        }

        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        if self.proxy.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if self.proxy.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        if self.pools.is_empty() {
            return Err(common::Error::Config(
                "at least one [[pools]] entry is required".into(),
            ));
        }

        let mut names = HashSet::new();
        for pool in &self.pools {
            if pool.name.trim().is_empty() {
                return Err(common::Error::Config("pool name must not be empty".into()));
            }
            if !names.insert(pool.name.as_str()) {
                return Err(common::Error::Config(format!(
                    "duplicate pool name: {}",
                    pool.name
                )));
            }
            if !pool.upstream_url.starts_with("http://")
                && !pool.upstream_url.starts_with("https://")
            {
                return Err(common::Error::Config(format!(
                    "upstream_url must start with http:// or https://, got: {} (pool {})",
                    pool.upstream_url, pool.name
                )));
            }
        }

        Ok(())
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("ai-gateway.toml")
    }
}
