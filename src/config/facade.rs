//! ConfigLoader facade delegating to merge service.

use super::merge::service::MergeService;
use super::paths::xdg_root;
use super::PlotTagConfig;
use crate::error::ApiError;
use config::ConfigError;
use std::path::{Path, PathBuf};

/// Configuration loader facade.
pub struct ConfigLoader;

impl ConfigLoader {
    /// `$XDG_CONFIG_HOME/plottag/config.toml`
    pub fn global_config_path() -> Result<PathBuf, ApiError> {
        xdg_root::global_config_path()
    }

    /// Load configuration from files and environment.
    pub fn load(workspace_root: &Path) -> Result<PlotTagConfig, ConfigError> {
        MergeService::load(workspace_root)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> Result<PlotTagConfig, ConfigError> {
        MergeService::load_from_file(path)
    }

    /// Create default configuration.
    pub fn default() -> PlotTagConfig {
        PlotTagConfig::default()
    }

    /// Write the default configuration as TOML to `path`, creating parent
    /// directories.
    pub fn write_default(path: &Path) -> Result<(), ApiError> {
        let text = toml::to_string_pretty(&PlotTagConfig::default())
            .map_err(|e| ApiError::ConfigError(format!("Failed to serialize config: {}", e)))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                ApiError::ConfigError(format!("Failed to create config directory: {}", e))
            })?;
        }
        std::fs::write(path, text).map_err(|e| {
            ApiError::ConfigError(format!("Failed to write config file {:?}: {}", path, e))
        })
    }
}
