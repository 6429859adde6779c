//! Configuration module for Nimbus.
//!
//! Typed configuration structs that map to the YAML configuration file,
//! with loading, defaults, and per-section granularity.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the content store and metadata snapshot.
    pub cache_dir: PathBuf,
    pub sync: SyncConfig,
    pub mount: MountConfig,
    pub logging: LoggingConfig,
}

/// Delta synchronization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Seconds between delta polling cycles.
    pub poll_interval: u64,
    /// Seconds between upload worker ticks.
    pub upload_tick: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: 30,
            upload_tick: 1,
        }
    }
}

/// Kernel-facing mount settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MountConfig {
    /// Seconds the kernel may cache entries and attributes.
    pub attr_timeout: u64,
    /// Maximum number of backgrounded kernel requests.
    pub max_background: u16,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            attr_timeout: 1,
            max_background: 1024,
        }
    }
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// The delta poll interval as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.sync.poll_interval)
    }

    /// The upload worker tick as a [`Duration`].
    pub fn upload_tick(&self) -> Duration {
        Duration::from_secs(self.sync.upload_tick)
    }

    /// The kernel entry/attr timeout as a [`Duration`].
    pub fn attr_timeout(&self) -> Duration {
        Duration::from_secs(self.mount.attr_timeout)
    }
}
