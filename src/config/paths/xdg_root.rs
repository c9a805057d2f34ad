//! XDG and platform directory resolution.

use crate::error::DirectoryError;
use std::path::PathBuf;

const APP_NAME: &str = "colldir";

/// `$XDG_CONFIG_HOME`, else `$HOME/.config`.
pub fn config_home() -> Option<PathBuf> {
    if let Ok(xdg_config_home) = std::env::var("XDG_CONFIG_HOME") {
        if !xdg_config_home.is_empty() {
            return Some(PathBuf::from(xdg_config_home));
        }
    }
    std::env::var("HOME")
        .ok()
        .map(|home| PathBuf::from(home).join(".config"))
}

/// `$XDG_CONFIG_HOME/colldir/config.toml`
pub fn global_config_file() -> Option<PathBuf> {
    config_home().map(|dir| dir.join(APP_NAME).join("config.toml"))
}

/// Platform cache directory entry for the record snapshot.
pub fn default_cache_file() -> Result<PathBuf, DirectoryError> {
    let dirs = directories::ProjectDirs::from("", APP_NAME, APP_NAME).ok_or_else(|| {
        DirectoryError::ConfigError(
            "Could not determine platform cache directory (HOME not set)".to_string(),
        )
    })?;
    Ok(dirs.cache_dir().join("directory.bin"))
}
