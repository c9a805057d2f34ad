//! MergeService: orchestrates sources, applies merge policy, deserializes to DirectoryConfig.

use super::policy;
use crate::config::sources::{environment, explicit_file, global_file};
use crate::config::DirectoryConfig;
use crate::error::DirectoryError;
use std::path::Path;
use tracing::debug;

/// Merge service for config composition.
pub struct MergeService;

impl MergeService {
    /// Precedence: defaults (lowest) -> global file -> explicit file -> environment (highest).
    pub fn load(explicit: Option<&Path>) -> Result<DirectoryConfig, DirectoryError> {
        let builder = policy::builder_with_defaults()?;
        let builder = global_file::add_to_builder(builder);
        let builder = match explicit {
            Some(path) => explicit_file::add_to_builder(builder, path)?,
            None => builder,
        };
        let builder = environment::add_to_builder(builder);

        let config: DirectoryConfig = builder.build()?.try_deserialize()?;
        debug!(
            explicit = ?explicit,
            primary_url = %config.registry.primary_url,
            "Loaded configuration"
        );
        Ok(config)
    }
}
