//! Application path resolution for portable and installed setups.
//!
//! - **Dev mode**: a `config.yaml` in the current working directory (the
//!   typical `cargo run` layout) keeps every file in that directory.
//! - **Portable mode**: a `.portable` marker next to the executable keeps
//!   every file next to the executable. Explicit opt-in, so an installation
//!   under a read-only directory never ends up portable by accident.
//! - **Installed mode** (default): files live in the per-user data
//!   directory.

use anyhow::Context;
use std::path::PathBuf;
use tracing::{debug, info};

/// Directory name used in installed mode.
const APP_NAME: &str = "launchkey-surface";

/// Resolved locations for the config file and persisted driver state.
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Path to the configuration file
    pub config: PathBuf,
    /// Directory holding persisted state
    pub state_dir: PathBuf,
    /// Whether files live next to the executable (or cwd in dev mode)
    pub is_portable: bool,
}

impl AppPaths {
    /// Detect the appropriate paths for this run.
    ///
    /// Called before logging is initialized, so early diagnostics go
    /// through eprintln.
    pub fn detect() -> Self {
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."));

        // In debug builds a config.yaml in the working directory wins,
        // which makes `cargo run` use the project's own config.
        #[cfg(debug_assertions)]
        {
            let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
            let cwd_config = cwd.join("config.yaml");
            if cwd_config.exists() {
                eprintln!(
                    "[paths] Running in DEV mode (config.yaml found in cwd: {})",
                    cwd.display()
                );
                return Self {
                    config: cwd_config,
                    state_dir: cwd.join(".state"),
                    is_portable: true,
                };
            }
        }

        let portable_marker = exe_dir.join(".portable");
        if portable_marker.exists() {
            Self {
                config: exe_dir.join("config.yaml"),
                state_dir: exe_dir.join(".state"),
                is_portable: true,
            }
        } else {
            let app_data = dirs::data_dir()
                .unwrap_or_else(|| {
                    eprintln!(
                        "[paths] WARNING: dirs::data_dir() returned None, falling back to exe dir"
                    );
                    exe_dir.clone()
                })
                .join(APP_NAME);

            Self {
                config: app_data.join("config.yaml"),
                state_dir: app_data.join("state"),
                is_portable: false,
            }
        }
    }

    /// Base directory, for log lines.
    pub fn base_dir(&self) -> PathBuf {
        self.config
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Where the serialized surface state lands between runs.
    pub fn state_file(&self) -> PathBuf {
        self.state_dir.join("surface.json")
    }

    /// Ensure all required directories exist. In installed mode, also seeds
    /// the config location from `config.example.yaml` when no config file
    /// exists yet.
    pub fn ensure_directories(&self) -> anyhow::Result<()> {
        if !self.state_dir.exists() {
            debug!("Creating state directory: {}", self.state_dir.display());
            std::fs::create_dir_all(&self.state_dir)?;
        }

        if !self.is_portable {
            if let Some(config_parent) = self.config.parent() {
                if !config_parent.exists() {
                    debug!("Creating config directory: {}", config_parent.display());
                    std::fs::create_dir_all(config_parent)?;
                }
            }

            if !self.config.exists() {
                self.copy_example_config()?;
            }
        }

        Ok(())
    }

    /// Seed the config location from an example file next to the
    /// executable or in the working directory.
    fn copy_example_config(&self) -> anyhow::Result<()> {
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."));

        for example in [
            exe_dir.join("config.example.yaml"),
            PathBuf::from("config.example.yaml"),
        ] {
            if example.exists() {
                info!("Copying example config to {}", self.config.display());
                std::fs::copy(&example, &self.config).with_context(|| {
                    format!(
                        "Failed to copy example config from {} to {}",
                        example.display(),
                        self.config.display()
                    )
                })?;
                return Ok(());
            }
        }

        info!("No config found, please create {}", self.config.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_file_lives_in_state_dir() {
        let paths = AppPaths {
            config: PathBuf::from("test/config.yaml"),
            state_dir: PathBuf::from("test/.state"),
            is_portable: true,
        };

        assert!(paths.is_portable);
        assert_eq!(paths.state_file(), PathBuf::from("test/.state/surface.json"));
        assert_eq!(paths.base_dir(), PathBuf::from("test"));
    }
}
