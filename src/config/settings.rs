//! Application settings

use crate::core::framing::LineEnding;
use crate::core::link::{LinkSettings, DEFAULT_BAUD_RATE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No platform config directory
    #[error("Could not determine config directory")]
    NoConfigDir,

    /// Reading or writing the file failed
    #[error("Config I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// File is not valid TOML for this schema
    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Serialization failed
    #[error("Could not serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Baud rate preselected for new connections
    pub default_baud: u32,
    /// Line ending preselected for sends
    pub line_ending: LineEnding,
    /// Profile directory override
    pub profiles_dir: Option<PathBuf>,
    /// Reader loop tuning
    pub link: LinkConfig,
    /// Diagnostics
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_baud: DEFAULT_BAUD_RATE,
            line_ending: LineEnding::CrLf,
            profiles_dir: None,
            link: LinkConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    fn default_path() -> Result<PathBuf, ConfigError> {
        Ok(super::config_dir()
            .ok_or(ConfigError::NoConfigDir)?
            .join("config.toml"))
    }

    /// Load config from the platform config directory
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::default_path()?)
    }

    /// Load config from `path`; a missing file gives defaults
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to the platform config directory
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::default_path()?)
    }

    /// Save config to `path`
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Directory holding profile records
    pub fn profiles_dir(&self) -> PathBuf {
        self.profiles_dir.clone().unwrap_or_else(super::profiles_dir)
    }
}

/// Reader loop tuning, in milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Port read timeout
    pub read_timeout_ms: u64,
    /// Sleep after an empty read
    pub idle_pause_ms: u64,
    /// Read buffer size
    pub chunk_size: usize,
    /// Disconnect handshake limit
    pub disconnect_timeout_ms: u64,
    /// Event queue capacity
    pub event_capacity: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self::from(&LinkSettings::default())
    }
}

impl From<&LinkSettings> for LinkConfig {
    fn from(settings: &LinkSettings) -> Self {
        let millis = |d: Duration| u64::try_from(d.as_millis()).unwrap_or(u64::MAX);
        Self {
            read_timeout_ms: millis(settings.read_timeout),
            idle_pause_ms: millis(settings.idle_pause),
            chunk_size: settings.chunk_size,
            disconnect_timeout_ms: millis(settings.disconnect_timeout),
            event_capacity: settings.event_capacity,
        }
    }
}

impl From<&LinkConfig> for LinkSettings {
    fn from(config: &LinkConfig) -> Self {
        Self {
            read_timeout: Duration::from_millis(config.read_timeout_ms),
            idle_pause: Duration::from_millis(config.idle_pause_ms),
            chunk_size: config.chunk_size,
            disconnect_timeout: Duration::from_millis(config.disconnect_timeout_ms),
            event_capacity: config.event_capacity,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive (overridden by `RUST_LOG`)
    pub level: String,
    /// Also write a daily log file
    pub file: bool,
    /// Log directory override
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: false,
            directory: None,
        }
    }
}

impl LoggingConfig {
    /// Directory for log files
    pub fn directory(&self) -> Option<PathBuf> {
        self.directory.clone().or_else(super::log_dir)
    }
}
