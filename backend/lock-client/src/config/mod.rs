use crate::LOCK_HELPER_PATH;
use crate::error::config::ConfigError;

use common::ErrorLocation;

use std::panic::Location;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{info, warn};
use serde::{Deserialize, Serialize};

const CONFIG_FILE_NAME: &str = "lock-client.toml";
const CONFIG_DIR_NAME: &str = "lock-client";
const MAX_RETRIES_LIMIT: u32 = 16;
const MAX_STALE_GRACE_MS: u64 = 10_000;

// ============================================
// CONFIG STRUCT
// ============================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockClientConfig {
    /// Executable launched as the lock helper.
    #[serde(default = "default_helper_path")]
    pub helper_path: PathBuf,

    /// Resends allowed after the first attempt when responses go out of step.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Deadline for a response to arrive. `None` waits forever.
    #[serde(default)]
    pub response_timeout_ms: Option<u64>,

    /// How long to wait for the real reply after discarding a stale one
    /// before treating the exchange as desynchronized.
    #[serde(default = "default_stale_grace_ms")]
    pub stale_grace_ms: u64,
}

impl Default for LockClientConfig {
    fn default() -> Self {
        Self {
            helper_path: default_helper_path(),
            max_retries: default_max_retries(),
            response_timeout_ms: None,
            stale_grace_ms: default_stale_grace_ms(),
        }
    }
}

// ============================================
// DEFAULT FUNCTIONS
// ============================================

fn default_helper_path() -> PathBuf {
    PathBuf::from(LOCK_HELPER_PATH)
}
fn default_max_retries() -> u32 {
    3
}
fn default_stale_grace_ms() -> u64 {
    250
}

// ============================================
// IMPLEMENTATION
// ============================================

impl LockClientConfig {
    pub fn with_helper_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.helper_path = path.into();
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_response_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.response_timeout_ms = timeout.map(|t| t.as_millis().min(u64::MAX as u128) as u64);
        self
    }

    pub fn with_stale_grace(mut self, grace: Duration) -> Self {
        self.stale_grace_ms = grace.as_millis().min(u64::MAX as u128) as u64;
        self
    }

    pub fn response_timeout(&self) -> Option<Duration> {
        self.response_timeout_ms.map(Duration::from_millis)
    }

    pub fn stale_grace(&self) -> Duration {
        Duration::from_millis(self.stale_grace_ms)
    }

    /// Load config from {config_dir}/lock-client.toml.
    ///
    /// # Returns
    ///
    /// Returns `Ok(LockClientConfig)` if loaded successfully or defaults if file missing.
    /// Returns `Err(ConfigError)` if file exists but is unreadable or invalid.
    #[track_caller]
    pub fn load(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE_NAME);

        if !config_path.exists() {
            info!(
                "Config file not found at {}, using defaults",
                config_path.display()
            );
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&config_path).map_err(|e| {
            warn!("Failed to read lock-client config: {e}");
            ConfigError::ReadError {
                location: ErrorLocation::from(Location::caller()),
                path: config_path.clone(),
                source: e,
            }
        })?;

        let config: LockClientConfig = toml::from_str(&contents).map_err(|e| {
            warn!("Failed to parse lock-client config: {e}");
            ConfigError::ParseError {
                location: ErrorLocation::from(Location::caller()),
                path: config_path.clone(),
                reason: e.to_string(),
            }
        })?;

        config.validate()?;

        info!("Config loaded from {}", config_path.display());
        Ok(config)
    }

    /// Load config from the user's config directory (`~/.config/lock-client` on Linux).
    #[track_caller]
    pub fn load_default() -> Result<Self, ConfigError> {
        let config_dir = dirs::config_dir().ok_or_else(|| ConfigError::DirectoryNotFound {
            location: ErrorLocation::from(Location::caller()),
        })?;

        Self::load(&config_dir.join(CONFIG_DIR_NAME))
    }

    /// Validate config values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] if any value is out of range.
    #[track_caller]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.helper_path.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError {
                location: ErrorLocation::from(Location::caller()),
                reason: "helper_path cannot be empty".to_string(),
            });
        }

        if self.max_retries > MAX_RETRIES_LIMIT {
            return Err(ConfigError::ValidationError {
                location: ErrorLocation::from(Location::caller()),
                reason: format!(
                    "Invalid max_retries: {} (must be 0-{MAX_RETRIES_LIMIT})",
                    self.max_retries
                ),
            });
        }

        if self.response_timeout_ms == Some(0) {
            return Err(ConfigError::ValidationError {
                location: ErrorLocation::from(Location::caller()),
                reason: "response_timeout_ms must be positive when set".to_string(),
            });
        }

        if self.stale_grace_ms > MAX_STALE_GRACE_MS {
            return Err(ConfigError::ValidationError {
                location: ErrorLocation::from(Location::caller()),
                reason: format!(
                    "Invalid stale_grace_ms: {} (must be 0-{MAX_STALE_GRACE_MS})",
                    self.stale_grace_ms
                ),
            });
        }

        Ok(())
    }
}
