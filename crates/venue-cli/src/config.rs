//! CLI configuration loading.
//!
//! Sources in priority order:
//! 1. The file passed with `--config`
//! 2. `venue.toml` in the working directory
//! 3. Environment variables and defaults

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use venue_commands::DispatcherConfig;
use venue_devices::AmpConfig;

/// Default configuration file name.
pub const CONFIG_FILE: &str = "venue.toml";

/// Complete CLI configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VenueConfig {
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub amp: AmpConfig,
}

/// Configuration sources in priority order.
enum ConfigSource {
    File(PathBuf, String),
    Env,
}

impl ConfigSource {
    fn detect(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            info!(category = "config", "Loading config from: {}", path.display());
            return Ok(ConfigSource::File(path.to_path_buf(), content));
        }

        if let Ok(content) = std::fs::read_to_string(CONFIG_FILE) {
            info!(category = "config", "Loading config from: {}", CONFIG_FILE);
            return Ok(ConfigSource::File(PathBuf::from(CONFIG_FILE), content));
        }

        info!(
            category = "config",
            "Loading config from environment variables"
        );
        Ok(ConfigSource::Env)
    }
}

impl VenueConfig {
    /// Load from the first available source.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match ConfigSource::detect(explicit)? {
            ConfigSource::File(path, content) => Self::from_toml(&content)
                .with_context(|| format!("Invalid config file {}", path.display())),
            ConfigSource::Env => Ok(Self {
                dispatcher: DispatcherConfig::from_env(),
                amp: AmpConfig::default(),
            }),
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}
