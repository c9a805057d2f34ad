//! Global config file: `$XDG_CONFIG_HOME/colldir/config.toml`, optional.

use crate::config::paths::xdg_root;
use config::builder::DefaultState;
use config::{ConfigBuilder, File};

pub fn add_to_builder(builder: ConfigBuilder<DefaultState>) -> ConfigBuilder<DefaultState> {
    match xdg_root::global_config_file() {
        Some(path) => builder.add_source(File::from(path).required(false)),
        None => builder,
    }
}
