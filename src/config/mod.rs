//! Configuration
//!
//! [`DirectoryConfig`] is assembled by [`ConfigLoader`] from built-in
//! defaults, the global `config.toml`, an optional explicit file and the
//! `COLLDIR__SECTION__KEY` environment overlay, in that order of precedence.

pub mod facade;
pub mod merge {
    pub mod policy;
    pub mod service;
}
pub mod paths {
    pub mod xdg_root;
}
pub mod sources {
    pub mod environment;
    pub mod explicit_file;
    pub mod global_file;
}

pub use facade::ConfigLoader;
pub use crate::logging::LoggingConfig;

use crate::error::DirectoryError;
use crate::registry::ResponseFormat;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Complete configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DirectoryConfig {
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub relevance: RelevanceConfig,
    #[serde(default)]
    pub tree: TreeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl DirectoryConfig {
    pub fn validate(&self) -> Result<(), DirectoryError> {
        self.registry.validate()?;
        if self.relevance.interval_ms == 0 {
            return Err(DirectoryError::ConfigError(
                "relevance.interval_ms must be greater than zero".into(),
            ));
        }
        if self.relevance.large_field_deg.is_nan() || self.relevance.large_field_deg <= 0.0 {
            return Err(DirectoryError::ConfigError(
                "relevance.large_field_deg must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, DirectoryError> {
        toml::to_string_pretty(self).map_err(|e| DirectoryError::ConfigError(e.to_string()))
    }
}

/// Registry endpoints and request settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_primary_url")]
    pub primary_url: String,

    /// Used when no indirection document is configured or it yields nothing.
    #[serde(default = "default_mirrors")]
    pub mirrors: Vec<String>,

    /// Indirection document listing registry sites, one URL per line.
    #[serde(default)]
    pub mirror_lookup_url: Option<String>,

    /// Connect timeout of the first attempt.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_mirror_connect_timeout_ms")]
    pub mirror_connect_timeout_ms: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default)]
    pub format: ResponseFormat,

    /// Properties left out of the cold-start fast pass.
    #[serde(default = "default_skipped_fields")]
    pub cold_start_skipped_fields: Vec<String>,
}

fn default_primary_url() -> String {
    "https://alasky.cds.unistra.fr/MocServer/query".to_string()
}

fn default_mirrors() -> Vec<String> {
    vec!["https://alaskybis.cds.unistra.fr/MocServer/query".to_string()]
}

fn default_connect_timeout_ms() -> u64 {
    3_000
}

fn default_mirror_connect_timeout_ms() -> u64 {
    15_000
}

fn default_user_agent() -> String {
    format!("colldir/{}", env!("CARGO_PKG_VERSION"))
}

fn default_skipped_fields() -> Vec<String> {
    [
        "hips_copyright",
        "hips_creator",
        "hips_builder",
        "hips_estsize",
        "obs_ack",
        "prov_progenitor",
        "bib_reference_url",
        "moc_access_url",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            primary_url: default_primary_url(),
            mirrors: default_mirrors(),
            mirror_lookup_url: None,
            connect_timeout_ms: default_connect_timeout_ms(),
            mirror_connect_timeout_ms: default_mirror_connect_timeout_ms(),
            user_agent: default_user_agent(),
            format: ResponseFormat::default(),
            cold_start_skipped_fields: default_skipped_fields(),
        }
    }
}

impl RegistryConfig {
    fn validate(&self) -> Result<(), DirectoryError> {
        reqwest::Url::parse(&self.primary_url).map_err(|e| {
            DirectoryError::ConfigError(format!(
                "registry.primary_url {:?} is not a URL: {}",
                self.primary_url, e
            ))
        })?;
        if self.connect_timeout_ms == 0 || self.mirror_connect_timeout_ms == 0 {
            return Err(DirectoryError::ConfigError(
                "registry connect timeouts must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Local cache location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Explicit cache file; `None` uses the platform cache directory.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}

impl CacheConfig {
    pub fn resolve_path(&self) -> Result<PathBuf, DirectoryError> {
        match &self.path {
            Some(path) if !path.as_os_str().is_empty() => Ok(path.clone()),
            _ => paths::xdg_root::default_cache_file(),
        }
    }
}

/// Synchronizer behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Follow the cold-start fast pass with a full fetch.
    #[serde(default = "default_true")]
    pub full_second_pass: bool,

    /// Use manifest uploads for warm starts; otherwise `TIMESTAMP=>N` queries.
    #[serde(default = "default_true")]
    pub use_manifest: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            full_second_pass: true,
            use_manifest: true,
        }
    }
}

/// Spatial relevance updater.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelevanceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Angular size (degrees) from which a padded circle replaces the polygon.
    #[serde(default = "default_large_field_deg")]
    pub large_field_deg: f64,
}

fn default_interval_ms() -> u64 {
    1_000
}

fn default_large_field_deg() -> f64 {
    30.0
}

impl Default for RelevanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: default_interval_ms(),
            large_field_deg: default_large_field_deg(),
        }
    }
}

impl RelevanceConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeConfig {
    /// Grouping nodes shallower than this start expanded when no saved
    /// expansion exists.
    #[serde(default = "default_expansion_depth")]
    pub default_expansion_depth: usize,
}

fn default_expansion_depth() -> usize {
    1
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            default_expansion_depth: default_expansion_depth(),
        }
    }
}

fn default_true() -> bool {
    true
}
