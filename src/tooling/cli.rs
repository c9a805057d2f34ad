//! CLI Tooling
//!
//! Command-line interface over the collection directory: synchronize with the
//! registry, inspect the cached tree, try filter expressions, and run one-shot
//! region queries.

use crate::config::{ConfigLoader, DirectoryConfig, LoggingConfig};
use crate::directory::{CollectionDirectory, RebuildMode};
use crate::error::DirectoryError;
use crate::filter;
use crate::registry::{HttpRegistrySource, RegistryClient, SkyRegion};
use crate::store::{LocalCache, RecordStore};
use crate::sync::{SyncState, Synchronizer};
use crate::tree::CollectionTree;
use crate::types::Timestamp;
use clap::{Parser, Subcommand, ValueEnum};
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;
use owo_colors::OwoColorize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Collection directory synchronization tool
#[derive(Parser, Debug)]
#[command(name = "colldir")]
#[command(about = "Synchronize and browse a sky survey collection registry")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path (layered over the global config)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long, global = true)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file, file+stderr, both)
    #[arg(long, global = true)]
    pub log_output: Option<String>,

    /// Log file path (if output includes "file")
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    pub format: OutputFormat,
}

impl Cli {
    /// Logging settings from the configuration with command-line overrides applied.
    pub fn logging_config(&self, base: &LoggingConfig) -> Result<LoggingConfig, DirectoryError> {
        let mut logging = base.clone();
        if let Some(level) = &self.log_level {
            logging.level = level.clone();
        }
        if let Some(format) = &self.log_format {
            logging.format = format.parse()?;
        }
        if let Some(output) = &self.log_output {
            logging.output = output.parse()?;
        }
        if let Some(file) = &self.log_file {
            logging.file = Some(file.clone());
        }
        Ok(logging)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Boot from the local cache, refresh from the registry and report
    Sync,
    /// Print the collection tree built from the local cache
    Tree {
        /// Hide records not matching this filter expression
        #[arg(long)]
        filter: Option<String>,
        /// Deepest level to print (root children are depth 1)
        #[arg(long)]
        depth: Option<usize>,
    },
    /// List the cached collections matching a filter expression
    Filter {
        expression: String,
    },
    /// Local cache commands
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
    /// Ask the registry which collections overlap a sky region
    Region {
        /// Center right ascension in degrees
        #[arg(long, allow_negative_numbers = true)]
        ra: f64,
        /// Center declination in degrees
        #[arg(long, allow_negative_numbers = true)]
        dec: f64,
        /// Field of view in degrees
        #[arg(long)]
        fov: f64,
    },
    /// Configuration commands
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    /// Show cache path, record count and staleness reference
    Info,
    /// Delete the local cache file
    Clear,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,
}

/// Command execution context.
pub struct CliContext {
    config: DirectoryConfig,
    format: OutputFormat,
}

impl CliContext {
    pub fn new(config_path: Option<PathBuf>, format: OutputFormat) -> Result<Self, DirectoryError> {
        let config = ConfigLoader::load_optional(config_path.as_deref())?;
        Ok(Self::with_config(config, format))
    }

    pub fn with_config(config: DirectoryConfig, format: OutputFormat) -> Self {
        Self { config, format }
    }

    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    pub fn execute(&self, command: &Commands) -> Result<String, DirectoryError> {
        let started = Instant::now();
        let result = match command {
            Commands::Sync => self.run_async(self.sync()),
            Commands::Tree { filter, depth } => self.tree(filter.as_deref(), *depth),
            Commands::Filter { expression } => self.filter(expression),
            Commands::Cache { command } => match command {
                CacheCommands::Info => self.cache_info(),
                CacheCommands::Clear => self.cache_clear(),
            },
            Commands::Region { ra, dec, fov } => self.run_async(self.region(*ra, *dec, *fov)),
            Commands::Config { command } => match command {
                ConfigCommands::Show => self.config_show(),
            },
        };
        info!(
            command = command_name(command),
            ok = result.is_ok(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Command finished"
        );
        result
    }

    fn run_async<F>(&self, future: F) -> Result<String, DirectoryError>
    where
        F: std::future::Future<Output = Result<String, DirectoryError>>,
    {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(DirectoryError::ConfigError(
                "Cannot run a registry command from within an async runtime".to_string(),
            ));
        }
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(future)
    }

    fn cache(&self) -> Result<Option<LocalCache>, DirectoryError> {
        if !self.config.cache.enabled {
            return Ok(None);
        }
        Ok(Some(LocalCache::new(self.config.cache.resolve_path()?)))
    }

    fn cached_store(&self) -> Result<RecordStore, DirectoryError> {
        let cache = self.cache()?.ok_or_else(|| {
            DirectoryError::CacheError("the local cache is disabled".to_string())
        })?;
        cache.try_load().map_err(|e| {
            DirectoryError::CacheError(format!("{} (run `colldir sync` first)", e))
        })
    }

    fn client(&self) -> Result<RegistryClient, DirectoryError> {
        let source = HttpRegistrySource::new(&self.config.registry)?;
        Ok(RegistryClient::new(Arc::new(source)))
    }

    async fn sync(&self) -> Result<String, DirectoryError> {
        let directory = Arc::new(CollectionDirectory::new(
            RecordStore::new(),
            &self.config.tree,
        ));
        let sync = Synchronizer::new(
            directory.clone(),
            self.client()?,
            self.cache()?,
            &self.config,
        );
        let state = sync.run().await;
        let tree = directory.current_tree();
        Ok(match self.format {
            OutputFormat::Json => to_json(&json!({
                "state": state,
                "record_count": directory.record_count(),
                "generation": tree.generation(),
            })),
            OutputFormat::Text => format_sync_text(&state, directory.record_count(), &tree),
        })
    }

    fn tree(&self, expression: Option<&str>, depth: Option<usize>) -> Result<String, DirectoryError> {
        let directory = CollectionDirectory::new(self.cached_store()?, &self.config.tree);
        if let Some(expression) = expression {
            directory.apply_filter(expression)?;
        }
        let tree = directory.rebuild_tree(RebuildMode::Full);
        Ok(match self.format {
            OutputFormat::Json => format_tree_json(&tree, depth),
            OutputFormat::Text => format_tree_text(&tree, depth),
        })
    }

    fn filter(&self, expression: &str) -> Result<String, DirectoryError> {
        let mut store = self.cached_store()?;
        let outcome = filter::apply_filter(&mut store, expression)?;
        let mut ids: Vec<&str> = store
            .iter()
            .filter(|r| !r.hidden)
            .map(|r| r.id.as_str())
            .collect();
        ids.sort_unstable();
        Ok(match self.format {
            OutputFormat::Json => to_json(&json!({
                "expression": outcome.expression,
                "matched": outcome.matched,
                "hidden": outcome.hidden,
                "ids": ids,
            })),
            OutputFormat::Text => {
                let mut out = ids.join("\n");
                out.push_str(&format!(
                    "\n\n{} matched, {} hidden",
                    outcome.matched, outcome.hidden
                ));
                out
            }
        })
    }

    fn cache_info(&self) -> Result<String, DirectoryError> {
        let Some(cache) = self.cache()? else {
            return Ok(match self.format {
                OutputFormat::Json => to_json(&json!({ "enabled": false })),
                OutputFormat::Text => "Local cache is disabled".to_string(),
            });
        };
        let loaded = cache.try_load();
        let (records, staleness, problem) = match &loaded {
            Ok(store) => (Some(store.len()), cache.staleness_reference(store), None),
            Err(e) => (None, None, Some(e.to_string())),
        };
        let written = cache.timestamp();
        Ok(match self.format {
            OutputFormat::Json => to_json(&json!({
                "enabled": true,
                "path": cache.path(),
                "exists": cache.exists(),
                "record_count": records,
                "written_at": written,
                "staleness_reference": staleness,
                "error": problem,
            })),
            OutputFormat::Text => {
                let mut table = Table::new();
                table.load_preset(UTF8_BORDERS_ONLY);
                table.add_row(vec!["Path".to_string(), cache.path().display().to_string()]);
                table.add_row(vec![
                    "Records".to_string(),
                    records.map(|n| n.to_string()).unwrap_or_else(|| "-".to_string()),
                ]);
                table.add_row(vec!["Written".to_string(), format_timestamp(written)]);
                table.add_row(vec![
                    "Staleness reference".to_string(),
                    format_timestamp(staleness),
                ]);
                if let Some(problem) = problem {
                    table.add_row(vec!["Unusable".to_string(), problem]);
                }
                format!("{}\n{}", format_section_heading("Local cache"), table)
            }
        })
    }

    fn cache_clear(&self) -> Result<String, DirectoryError> {
        let Some(cache) = self.cache()? else {
            return Ok("Local cache is disabled".to_string());
        };
        let removed = cache.clear()?;
        Ok(match self.format {
            OutputFormat::Json => to_json(&json!({ "path": cache.path(), "removed": removed })),
            OutputFormat::Text if removed => format!("Removed {}", cache.path().display()),
            OutputFormat::Text => format!("No cache at {}", cache.path().display()),
        })
    }

    async fn region(&self, ra: f64, dec: f64, fov: f64) -> Result<String, DirectoryError> {
        if fov.is_nan() || fov <= 0.0 {
            return Err(DirectoryError::ConfigError(
                "--fov must be a positive number of degrees".to_string(),
            ));
        }
        let region = SkyRegion::for_viewport(ra, dec, fov, self.config.relevance.large_field_deg);
        let mut ids: Vec<String> = self.client()?.fetch_region(&region).await?.into_iter().collect();
        ids.sort_unstable();
        Ok(match self.format {
            OutputFormat::Json => to_json(&json!({ "count": ids.len(), "ids": ids })),
            OutputFormat::Text => {
                let mut out = ids.join("\n");
                out.push_str(&format!("\n\n{} collection(s) overlap the region", ids.len()));
                out
            }
        })
    }

    fn config_show(&self) -> Result<String, DirectoryError> {
        match self.format {
            OutputFormat::Json => Ok(to_json(&self.config)),
            OutputFormat::Text => self.config.to_toml(),
        }
    }
}

fn command_name(command: &Commands) -> &'static str {
    match command {
        Commands::Sync => "sync",
        Commands::Tree { .. } => "tree",
        Commands::Filter { .. } => "filter",
        Commands::Cache { .. } => "cache",
        Commands::Region { .. } => "region",
        Commands::Config { .. } => "config",
    }
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
}

fn format_section_heading(title: &str) -> String {
    format!("{}", title.bold().underline())
}

fn format_timestamp(ts: Option<Timestamp>) -> String {
    ts.and_then(chrono::DateTime::<chrono::Utc>::from_timestamp_millis)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "-".to_string())
}

fn format_sync_text(state: &SyncState, record_count: usize, tree: &CollectionTree) -> String {
    let mut out = format!("{}\n", format_section_heading("Sync"));
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.add_row(vec!["Records".to_string(), record_count.to_string()]);
    table.add_row(vec!["Tree generation".to_string(), tree.generation().to_string()]);
    if let Some(report) = &state.last_report {
        table.add_row(vec!["Upserted".to_string(), report.upserted.to_string()]);
        table.add_row(vec!["Removed".to_string(), report.removed.to_string()]);
        table.add_row(vec!["Skipped".to_string(), report.skipped.to_string()]);
        if let Some(endpoint) = report.endpoint {
            table.add_row(vec!["Endpoint".to_string(), endpoint.to_string()]);
        }
        if report.interrupted {
            table.add_row(vec!["Interrupted".to_string(), "yes".to_string()]);
        }
        if let Some(error) = &report.error {
            table.add_row(vec!["Error".to_string(), error.red().to_string()]);
        }
    }
    out.push_str(&table.to_string());
    if let Some(advisory) = &state.advisory {
        out.push_str(&format!("\n\n{}", advisory.yellow()));
    }
    out
}

fn format_tree_text(tree: &CollectionTree, max_depth: Option<usize>) -> String {
    let mut out = String::new();
    for node in tree.iter().filter(|n| !n.is_root()) {
        if max_depth.map(|d| node.depth > d).unwrap_or(false) {
            continue;
        }
        let indent = "  ".repeat(node.depth.saturating_sub(1));
        if node.is_leaf {
            let id = node.record_id.as_deref().unwrap_or("");
            let line = format!("{}{} [{}]", indent, node.label, id);
            if node.hidden {
                out.push_str(&format!("{}\n", line.dimmed()));
            } else {
                out.push_str(&format!("{}\n", line));
            }
        } else {
            out.push_str(&format!(
                "{}{} ({}/{})\n",
                indent,
                node.label.bold(),
                node.live_count,
                node.ref_count
            ));
        }
    }
    out.push_str(&format!(
        "\n{} collection(s), generation {}",
        tree.leaf_count(),
        tree.generation()
    ));
    out
}

fn format_tree_json(tree: &CollectionTree, max_depth: Option<usize>) -> String {
    let nodes: Vec<_> = tree
        .iter()
        .filter(|n| !n.is_root())
        .filter(|n| max_depth.map(|d| n.depth <= d).unwrap_or(true))
        .map(|n| {
            json!({
                "path": n.path,
                "label": n.label,
                "depth": n.depth,
                "leaf": n.is_leaf,
                "id": n.record_id,
                "hidden": n.hidden,
                "live_count": n.live_count,
                "ref_count": n.ref_count,
            })
        })
        .collect();
    to_json(&json!({
        "generation": tree.generation(),
        "leaf_count": tree.leaf_count(),
        "nodes": nodes,
    }))
}
