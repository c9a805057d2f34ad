//! Environment variable source: COLLDIR prefix with __ separator

use config::builder::DefaultState;
use config::ConfigBuilder;
use config::Environment;

pub const ENV_PREFIX: &str = "COLLDIR";

/// Add environment variable overlay to builder.
///
/// `COLLDIR__REGISTRY__PRIMARY_URL=...` sets `registry.primary_url`. List
/// values are comma separated.
pub fn add_to_builder(builder: ConfigBuilder<DefaultState>) -> ConfigBuilder<DefaultState> {
    builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("registry.mirrors")
            .with_list_parse_key("registry.cold_start_skipped_fields"),
    )
}
