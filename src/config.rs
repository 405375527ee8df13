//! Configuration management for the Launchkey surface driver.
//!
//! Handles loading and saving of the YAML configuration file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::ports::ProbeSpec;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub session: SessionConfig,
    /// Overrides the default location of the persisted surface state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_file: Option<PathBuf>,
}

/// Device discovery configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceConfig {
    /// Display name used in logs and state documents
    #[serde(default = "default_device_name")]
    pub name: String,
    /// Port name patterns the probe matches against
    #[serde(default)]
    pub probe: ProbeSpec,
}

/// Built-in demo session configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    /// Number of mixing channels the demo session exposes
    #[serde(default = "default_track_count")]
    pub tracks: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: default_device_name(),
            probe: ProbeSpec::default(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tracks: default_track_count(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file
    pub async fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: AppConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?;

        Ok(config)
    }

    /// Save configuration to file
    pub async fn save(&self, path: &Path) -> Result<()> {
        let yaml = serde_yaml::to_string(self).context("Failed to serialize config to YAML")?;

        fs::write(path, yaml)
            .await
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }
}

// Default value functions
fn default_device_name() -> String { "Launchkey MK3".to_string() }
fn default_track_count() -> usize { 8 }
