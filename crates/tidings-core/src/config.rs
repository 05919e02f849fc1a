//! Tidings configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, TidingsError};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TidingsConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl TidingsConfig {
    /// Load config from the default path (~/.tidings/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| TidingsError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| TidingsError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| TidingsError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject settings the scheduler cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.capacity == 0 {
            return Err(TidingsError::config("scheduler.capacity must be at least 1"));
        }
        if self.scheduler.capacity > self.storage.store_ceiling {
            return Err(TidingsError::config(format!(
                "scheduler.capacity ({}) exceeds storage.store_ceiling ({})",
                self.scheduler.capacity, self.storage.store_ceiling
            )));
        }
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Tidings home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".tidings")
    }
}

/// Admission policy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum number of records admitted into the delivery store at once.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

/// Default admission ceiling. Kept below the platform limit of 64 pending
/// entries, leaving four slots the scheduler never claims.
pub const DEFAULT_CAPACITY: usize = 60;

/// Hard limit of pending entries enforced by the local delivery stores.
pub const DEFAULT_STORE_CEILING: usize = 64;

fn default_capacity() -> usize { DEFAULT_CAPACITY }
fn default_store_ceiling() -> usize { DEFAULT_STORE_CEILING }
fn default_data_dir() -> String { "~/.tidings".into() }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
        }
    }
}

/// Where the overflow queue and the local delivery store live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_store_ceiling")]
    pub store_ceiling: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            store_ceiling: default_store_ceiling(),
        }
    }
}
