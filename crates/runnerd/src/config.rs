//! Configuration loading and types

use std::path::{Path, PathBuf};

use runnerd_core::{AgentSettings, DesiredConfig};
use serde::{Deserialize, Serialize};

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "RUNNERD_CONFIG";

/// Top-level configuration for the runnerd agent
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Declared runner configuration
    #[serde(default)]
    pub runner: DesiredConfig,
    /// Host paths and agent behaviour
    #[serde(default)]
    pub agent: AgentSettings,
    /// Logging settings
    #[serde(default)]
    pub log: LogConfig,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error), overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed
    pub fn load(path: &Path) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| eyre::eyre!("failed to read {}: {e}", path.display()))?;
        Self::parse(&content).map_err(|e| eyre::eyre!("invalid config {}: {e}", path.display()))
    }

    /// Parse configuration from TOML text
    ///
    /// # Errors
    /// Returns error on malformed TOML or invalid runner settings
    pub fn parse(content: &str) -> eyre::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.runner.validate()?;
        Ok(config)
    }

    /// Candidate paths, in lookup order
    fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![
            PathBuf::from("runnerd.toml"),
            PathBuf::from("/etc/runnerd/runnerd.toml"),
        ];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("runnerd/runnerd.toml"));
        }
        paths
    }

    /// Load from an explicit path, `RUNNERD_CONFIG`, the default paths, or
    /// fall back to defaults
    ///
    /// Returns the config and the file it came from.
    ///
    /// # Errors
    /// Returns error if a named file cannot be loaded
    pub fn resolve(explicit: Option<&Path>) -> eyre::Result<(Self, Option<PathBuf>)> {
        if let Some(path) = explicit {
            return Ok((Self::load(path)?, Some(path.to_path_buf())));
        }

        if let Ok(path) = std::env::var(CONFIG_ENV) {
            let path = PathBuf::from(path);
            return Ok((Self::load(&path)?, Some(path)));
        }

        for path in Self::search_paths() {
            if path.exists() {
                return Ok((Self::load(&path)?, Some(path)));
            }
        }

        // Return default config if no file found
        Ok((Config::default(), None))
    }
}
