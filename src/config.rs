use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::catalog::DEFAULT_METADATA_URL;
use crate::dispatch::default_workers;
use crate::error::SyncError;
use crate::store::DEFAULT_BUSY_TIMEOUT_MS;

pub const DEFAULT_CONFIG_FILE: &str = "catalog-sync.json";
pub const DEFAULT_PATTERN: &str = "hospital";
pub const DEFAULT_DATA_DIR: &str = "data";
pub const DEFAULT_CONTROL_DB: &str = "control.db";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub metadata_url: Option<String>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub data_dir: Option<Utf8PathBuf>,
    #[serde(default)]
    pub control_db: Option<Utf8PathBuf>,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub busy_timeout_ms: Option<u64>,
}

/// Command-line values that win over the config file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub pattern: Option<String>,
    pub workers: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub metadata_url: String,
    pub pattern: String,
    pub data_dir: Utf8PathBuf,
    pub control_db: Utf8PathBuf,
    pub workers: usize,
    pub timeout: Duration,
    pub busy_timeout: Duration,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads `path`, or `catalog-sync.json` when present, else uses defaults.
    pub fn resolve(
        path: Option<&str>,
        overrides: ConfigOverrides,
    ) -> Result<ResolvedConfig, SyncError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        let config = if path.is_none() && !config_path.exists() {
            Config::default()
        } else {
            let content = fs::read_to_string(&config_path)
                .map_err(|_| SyncError::ConfigRead(config_path.clone()))?;
            serde_json::from_str(&content).map_err(|err| SyncError::ConfigParse(err.to_string()))?
        };

        Self::resolve_config(config, overrides)
    }

    pub fn resolve_config(
        config: Config,
        overrides: ConfigOverrides,
    ) -> Result<ResolvedConfig, SyncError> {
        let workers = overrides
            .workers
            .or(config.workers)
            .unwrap_or_else(default_workers);
        if workers == 0 {
            return Err(SyncError::InvalidConfig(
                "workers must be greater than zero".to_string(),
            ));
        }

        let timeout_secs = config.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);
        if timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "timeout_secs must be greater than zero".to_string(),
            ));
        }

        let pattern = overrides
            .pattern
            .or(config.pattern)
            .unwrap_or_else(|| DEFAULT_PATTERN.to_string());
        if pattern.is_empty() {
            return Err(SyncError::InvalidConfig("pattern must not be empty".to_string()));
        }

        Ok(ResolvedConfig {
            metadata_url: config
                .metadata_url
                .unwrap_or_else(|| DEFAULT_METADATA_URL.to_string()),
            pattern,
            data_dir: config
                .data_dir
                .unwrap_or_else(|| Utf8PathBuf::from(DEFAULT_DATA_DIR)),
            control_db: config
                .control_db
                .unwrap_or_else(|| Utf8PathBuf::from(DEFAULT_CONTROL_DB)),
            workers,
            timeout: Duration::from_secs(timeout_secs),
            busy_timeout: Duration::from_millis(
                config.busy_timeout_ms.unwrap_or(DEFAULT_BUSY_TIMEOUT_MS),
            ),
        })
    }
}
