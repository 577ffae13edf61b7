//! Bridge configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Error type for configuration loading.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    /// Failed to parse the configuration file.
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Bridge configuration, loadable from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Agent binary name or path (default: "claude").
    pub agent_path: String,
    /// System prompt appended to every request (may be empty).
    pub system_prompt: String,
    /// Deadline for one message send, in seconds.
    pub message_timeout_secs: u64,
    /// Deadline for the version probe, in seconds.
    pub version_check_timeout_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            agent_path: "claude".to_string(),
            system_prompt: String::new(),
            message_timeout_secs: 300,
            version_check_timeout_secs: 10,
        }
    }
}

impl BridgeConfig {
    /// Deadline for one message send.
    #[must_use]
    pub fn message_timeout(&self) -> Duration {
        Duration::from_secs(self.message_timeout_secs)
    }

    /// Deadline for the version probe.
    #[must_use]
    pub fn version_check_timeout(&self) -> Duration {
        Duration::from_secs(self.version_check_timeout_secs)
    }

    /// Load configuration from a specific TOML file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Load configuration from the first file found in the standard
    /// locations, falling back to defaults when none exists.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` only when a file exists but cannot be parsed.
    pub fn load() -> Result<Self, ConfigError> {
        for path in Self::search_paths() {
            if path.exists() {
                tracing::debug!(path = %path.display(), "Loading config");
                return Self::load_from(&path);
            }
        }
        Ok(Self::default())
    }

    /// Standard configuration file locations, most specific first.
    #[must_use]
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("claude-bridge.toml")];
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("claude-bridge").join("config.toml"));
        }
        paths
    }
}
