//! Credential store: loads the raw credential list for a pool at startup
//!
//! A source yields a comma-delimited list of opaque tokens. The environment
//! variable wins when set; otherwise an optional file is read. An absent or
//! empty source yields zero credentials, which makes every `acquire()` on the
//! resulting pool fail immediately.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::credential::Credential;
use crate::error::{Error, Result};

/// Where a pool's credentials come from.
#[derive(Debug, Clone)]
pub enum CredentialSource {
    /// Comma-delimited list in an environment variable
    Env { var: String },
    /// Comma- or newline-delimited list in a file
    File { path: PathBuf },
    /// Already-materialized list (programmatic setup, tests)
    Inline(Vec<String>),
}

impl CredentialSource {
    /// Load and parse the credential list.
    ///
    /// A missing environment variable is not an error (zero credentials); a
    /// non-UTF-8 value or an unreadable file is.
    pub fn load(&self) -> Result<Vec<Credential>> {
        match self {
            CredentialSource::Env { var } => match std::env::var(var) {
                Ok(raw) => {
                    let credentials = parse_list(&raw);
                    log_loaded(var, credentials.len());
                    Ok(credentials)
                }
                Err(std::env::VarError::NotPresent) => {
                    warn!(source = %var, "no credentials found in environment variable");
                    Ok(Vec::new())
                }
                Err(std::env::VarError::NotUnicode(_)) => Err(Error::Credential(format!(
                    "environment variable {var} is not valid UTF-8"
                ))),
            },
            CredentialSource::File { path } => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    Error::Credential(format!(
                        "failed to read credentials file {}: {e}",
                        path.display()
                    ))
                })?;
                let credentials = parse_list(&raw);
                log_loaded(&path.display().to_string(), credentials.len());
                Ok(credentials)
            }
            CredentialSource::Inline(list) => Ok(list
                .iter()
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(Credential::from)
                .collect()),
        }
    }
}

/// Resolve a pool's credentials: `env_var` when set, else `file`, else none.
pub fn resolve(env_var: &str, file: Option<&Path>) -> Result<Vec<Credential>> {
    if std::env::var_os(env_var).is_some() {
        return CredentialSource::Env {
            var: env_var.to_string(),
        }
        .load();
    }
    match file {
        Some(path) => CredentialSource::File {
            path: path.to_path_buf(),
        }
        .load(),
        None => {
            warn!(source = %env_var, "no credentials found in environment variable and no credentials file configured");
            Ok(Vec::new())
        }
    }
}

/// Split on commas and newlines, trim, and drop empty entries.
///
/// Order is preserved. Duplicates are left for the pool to collapse.
pub fn parse_list(raw: &str) -> Vec<Credential> {
    raw.split([',', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(Credential::from)
        .collect()
}

fn log_loaded(source: &str, count: usize) {
    if count == 0 {
        warn!(source, "credential source is empty");
    } else {
        info!(source, credentials = count, "loaded credentials");
    }
}
