use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing_subscriber::filter::LevelFilter;

use crate::store::{DEFAULT_STORAGE_KEY, sanitize_key};

const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:8787/chat";
const DEFAULT_TIMEOUT_MS: u64 = 120_000;
const DEFAULT_STORAGE_DIR: &str = ".ai-edit";
const DEFAULT_LOG_LEVEL: &str = "info";

pub const ENDPOINT_ENV: &str = "AI_EDIT_ENDPOINT";
pub const STORAGE_DIR_ENV: &str = "AI_EDIT_STORAGE_DIR";
pub const LOG_LEVEL_ENV: &str = "AI_EDIT_LOG_LEVEL";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config json: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// User-facing options; every field is optional.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditorOptions {
    pub endpoint: Option<String>,
    pub timeout_ms: Option<u64>,
    pub storage_dir: Option<String>,
    pub storage_key: Option<String>,
    pub history_limit: Option<usize>,
    pub log_level: Option<String>,
}

impl EditorOptions {
    pub fn from_json_str(payload: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(payload)?)
    }

    /// Overrides fields from `lookup(name)` for the `AI_EDIT_*` variables.
    pub fn apply_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let present = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        if let Some(endpoint) = present(ENDPOINT_ENV) {
            self.endpoint = Some(endpoint);
        }
        if let Some(storage_dir) = present(STORAGE_DIR_ENV) {
            self.storage_dir = Some(storage_dir);
        }
        if let Some(log_level) = present(LOG_LEVEL_ENV) {
            self.log_level = Some(log_level);
        }
        self
    }

    pub fn apply_env(self) -> Self {
        self.apply_overrides(|name| std::env::var(name).ok())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EditorConfig {
    pub endpoint: String,
    pub timeout_ms: u64,
    pub storage_dir: PathBuf,
    pub storage_key: String,
    pub history_limit: Option<usize>,
    pub log_level: String,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            storage_dir: PathBuf::from(DEFAULT_STORAGE_DIR),
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            history_limit: None,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl EditorConfig {
    pub fn from_options(options: Option<EditorOptions>) -> Result<Self, ConfigError> {
        let options = options.unwrap_or_default();
        let defaults = Self::default();
        let config = Self {
            endpoint: options.endpoint.unwrap_or(defaults.endpoint),
            timeout_ms: options.timeout_ms.unwrap_or(defaults.timeout_ms),
            storage_dir: options
                .storage_dir
                .map(PathBuf::from)
                .unwrap_or(defaults.storage_dir),
            storage_key: options.storage_key.unwrap_or(defaults.storage_key),
            history_limit: options.history_limit,
            log_level: options.log_level.unwrap_or(defaults.log_level),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reads a JSON options file, then applies environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let payload = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let options = EditorOptions::from_json_str(&payload)?.apply_env();
        Self::from_options(Some(options))
    }

    pub fn level_filter(&self) -> LevelFilter {
        LevelFilter::from_str(&self.log_level).unwrap_or(LevelFilter::INFO)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let url = reqwest::Url::parse(&self.endpoint)
            .map_err(|error| ConfigError::Invalid(format!("endpoint {}: {error}", self.endpoint)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid(format!(
                "endpoint must use http or https, received {}",
                url.scheme()
            )));
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeoutMs must be positive".to_string()));
        }
        sanitize_key(&self.storage_key)
            .map_err(|error| ConfigError::Invalid(error.to_string()))?;
        LevelFilter::from_str(&self.log_level).map_err(|_| {
            ConfigError::Invalid(format!("unknown log level {}", self.log_level))
        })?;
        Ok(())
    }
}
