//! Config file named on the command line. Must exist.

use crate::error::DirectoryError;
use config::builder::DefaultState;
use config::{ConfigBuilder, File};
use std::path::Path;

pub fn add_to_builder(
    builder: ConfigBuilder<DefaultState>,
    path: &Path,
) -> Result<ConfigBuilder<DefaultState>, DirectoryError> {
    if !path.is_file() {
        return Err(DirectoryError::ConfigError(format!(
            "Config file not found: {}",
            path.display()
        )));
    }
    Ok(builder.add_source(File::from(path).required(true)))
}
