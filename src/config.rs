//! Configuration file for the capture tool.
//!
//! Stream constraints are fixed by the session and have no entry here;
//! configuration only chooses the device, how long to wait for readiness
//! and where captured stills go.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Which platform implementation to acquire streams from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Synthetic frames, no hardware needed.
    Mock,
    /// Real camera via the `camera` feature.
    Native,
}

/// Device selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Camera device index.
    pub index: u32,
    /// Platform implementation.
    pub backend: Backend,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            index: 0,
            backend: Backend::Mock,
        }
    }
}

/// Session timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long to wait for the session to become ready, in milliseconds.
    pub ready_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ready_timeout_ms: 10_000,
        }
    }
}

impl SessionConfig {
    /// Ready timeout as a [`Duration`].
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }
}

/// Output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory captured stills are written to.
    pub directory: PathBuf,
    /// Number of stills to capture once ready.
    pub capture_count: u32,
    /// Metrics server port (0 to disable).
    pub metrics_port: u16,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("captures"),
            capture_count: 1,
            metrics_port: 0,
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("ready timeout must be positive")]
    InvalidTimeout,
    #[error("capture count must be between 1 and 100")]
    InvalidCaptureCount,
    #[error("failed to read config file: {0}")]
    FileReadError(String),
    #[error("failed to parse config file: {0}")]
    ParseError(String),
}

/// Full configuration file format.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileConfig {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

impl FileConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileReadError(e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Parses configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: FileConfig =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.ready_timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout);
        }
        if self.output.capture_count == 0 || self.output.capture_count > 100 {
            return Err(ConfigError::InvalidCaptureCount);
        }
        Ok(())
    }
}
