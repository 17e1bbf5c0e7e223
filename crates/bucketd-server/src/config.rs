use bucketd_store::StoreOptions;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Server settings, loaded from an optional TOML file and overridden by CLI
/// flags. Every field has a default, so an empty file is valid.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub listen: String,
    pub db_path: PathBuf,
    pub access_log: PathBuf,
    pub namespace: String,
    pub lock_timeout_ms: u64,
    pub grace_period_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8000".to_owned(),
            db_path: PathBuf::from("my.db"),
            access_log: PathBuf::from("access.log"),
            namespace: bucketd_store::DEFAULT_NAMESPACE.to_owned(),
            lock_timeout_ms: 1000,
            grace_period_ms: 5000,
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions::new(&self.db_path)
            .with_namespace(&self.namespace)
            .with_lock_timeout(self.lock_timeout())
    }
}
