//! CLI configuration stored at `~/.loft/config.json`.
//!
//! Remembers the kube context `loft start` last installed into, so a later
//! run against a different current context can ask which one was meant.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

const CONFIG_DIR_NAME: &str = ".loft";
const CONFIG_FILE_NAME: &str = "config.json";

/// Persistent CLI configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CliConfig {
    /// Kube context used by the last `loft start`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_install_context: Option<String>,
}

/// Returns `~/.loft/`, creating it if it doesn't exist.
pub fn loft_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| Error::command_failed("could not determine home directory"))?;
    let dir = home.join(CONFIG_DIR_NAME);
    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|e| {
            Error::command_failed(format!("failed to create {}: {}", dir.display(), e))
        })?;
    }
    Ok(dir)
}

/// Path to `~/.loft/config.json`.
pub fn config_path() -> Result<PathBuf> {
    Ok(loft_dir()?.join(CONFIG_FILE_NAME))
}

/// Load config from `~/.loft/config.json`, returning default if missing.
pub fn load_config() -> Result<CliConfig> {
    load_config_from(&config_path()?)
}

/// Save config to `~/.loft/config.json`.
pub fn save_config(config: &CliConfig) -> Result<()> {
    save_config_to(&config_path()?, config)
}

pub fn load_config_from(path: &Path) -> Result<CliConfig> {
    if !path.exists() {
        return Ok(CliConfig::default());
    }
    let data = std::fs::read_to_string(path)
        .map_err(|e| Error::command_failed(format!("failed to read {}: {}", path.display(), e)))?;
    serde_json::from_str(&data)
        .map_err(|e| Error::command_failed(format!("failed to parse {}: {}", path.display(), e)))
}

pub fn save_config_to(path: &Path, config: &CliConfig) -> Result<()> {
    let data = serde_json::to_string_pretty(config)
        .map_err(|e| Error::command_failed(format!("failed to serialize config: {}", e)))?;
    std::fs::write(path, data)
        .map_err(|e| Error::command_failed(format!("failed to write {}: {}", path.display(), e)))
}
