//! Base layer of every configuration build: the serialized defaults.

use crate::config::DirectoryConfig;
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError};

/// Builder seeded with [`DirectoryConfig::default`], so later sources only
/// need to name the keys they override.
pub fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let defaults = Config::try_from(&DirectoryConfig::default())?;
    Ok(Config::builder().add_source(defaults))
}
