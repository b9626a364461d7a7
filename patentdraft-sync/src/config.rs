//! Configuration loading for draft synchronization.
//!
//! All fields are required unless explicitly marked optional. No defaults.

use patentdraft_core::ConfigError;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    pub api_base_url: String,
    pub tenant_id: Uuid,
    pub auth: AuthConfig,
    pub request_timeout_ms: u64,
    pub retry: RetryConfig,
    pub cache: CacheSettings,
    pub autosave_debounce_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    pub api_key: Option<String>,
    pub jwt: Option<String>,
}

/// Backoff settings for transient gateway failures.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_ms: u64,
    pub max_ms: u64,
    pub multiplier: f64,
    pub jitter_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheSettings {
    /// Staleness tolerated for list and content reads.
    pub content_max_staleness_ms: u64,
    /// Staleness tolerated for the existence check. Longer than content.
    pub exists_max_staleness_ms: u64,
    /// Buffer size of the cache change and override channels.
    pub event_capacity: usize,
    /// Pause between writing a restore override and broadcasting it.
    pub override_broadcast_delay_ms: u64,
}

impl CacheSettings {
    pub fn content_max_staleness(&self) -> Duration {
        Duration::from_millis(self.content_max_staleness_ms)
    }

    pub fn exists_max_staleness(&self) -> Duration {
        Duration::from_millis(self.exists_max_staleness_ms)
    }

    pub fn override_broadcast_delay(&self) -> Duration {
        Duration::from_millis(self.override_broadcast_delay_ms)
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            content_max_staleness_ms: 30_000,
            exists_max_staleness_ms: 300_000,
            event_capacity: 256,
            override_broadcast_delay_ms: 100,
        }
    }
}

impl SyncConfig {
    /// Load and validate the file at `path`, or at `PATENTDRAFT_CONFIG` when
    /// no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(config_path_from_env)
            .ok_or(ConfigError::MissingConfigPath)?;
        let config = Self::from_path(&path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn autosave_debounce(&self) -> Duration {
        Duration::from_millis(self.autosave_debounce_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_base_url.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "api_base_url",
                reason: "must not be empty".to_string(),
            });
        }
        if !self.api_base_url.starts_with("http://") && !self.api_base_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue {
                field: "api_base_url",
                reason: "must start with http:// or https://".to_string(),
            });
        }
        if self.auth.api_key.is_none() && self.auth.jwt.is_none() {
            return Err(ConfigError::InvalidValue {
                field: "auth",
                reason: "api_key or jwt must be provided".to_string(),
            });
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "request_timeout_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.retry.initial_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "retry.initial_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.retry.max_ms < self.retry.initial_ms {
            return Err(ConfigError::InvalidValue {
                field: "retry.max_ms",
                reason: "must be >= initial_ms".to_string(),
            });
        }
        if self.retry.multiplier < 1.0 {
            return Err(ConfigError::InvalidValue {
                field: "retry.multiplier",
                reason: "must be >= 1.0".to_string(),
            });
        }
        if self.cache.content_max_staleness_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cache.content_max_staleness_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.cache.exists_max_staleness_ms < self.cache.content_max_staleness_ms {
            return Err(ConfigError::InvalidValue {
                field: "cache.exists_max_staleness_ms",
                reason: "must be >= content_max_staleness_ms".to_string(),
            });
        }
        if self.cache.event_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cache.event_capacity",
                reason: "must be > 0".to_string(),
            });
        }
        if self.autosave_debounce_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "autosave_debounce_ms",
                reason: "must be > 0".to_string(),
            });
        }
        Ok(())
    }
}

fn config_path_from_env() -> Option<PathBuf> {
    std::env::var("PATENTDRAFT_CONFIG").ok().map(PathBuf::from)
}
