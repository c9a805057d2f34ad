//! ConfigLoader facade delegating to the merge service.

use super::merge::service::MergeService;
use super::DirectoryConfig;
use crate::error::DirectoryError;
use std::path::Path;

/// Configuration loader facade.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from the global file and environment, then validate it.
    pub fn load() -> Result<DirectoryConfig, DirectoryError> {
        let config = MergeService::load(None)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with `path` layered over the global file.
    pub fn load_from_file(path: &Path) -> Result<DirectoryConfig, DirectoryError> {
        let config = MergeService::load(Some(path))?;
        config.validate()?;
        Ok(config)
    }

    /// `load_from_file` when a path is given, `load` otherwise.
    pub fn load_optional(path: Option<&Path>) -> Result<DirectoryConfig, DirectoryError> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => Self::load(),
        }
    }

    /// Create default configuration.
    pub fn default() -> DirectoryConfig {
        DirectoryConfig::default()
    }
}
