//! Logging System
//!
//! Structured logging on top of `tracing`. Level, format and destination come
//! from (highest first) CLI overrides, `COLLDIR_LOG*` environment variables,
//! the configuration file and built-in defaults.

use crate::error::DirectoryError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt as stdfmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

pub const ENV_LOG: &str = "COLLDIR_LOG";
pub const ENV_LOG_FORMAT: &str = "COLLDIR_LOG_FORMAT";
pub const ENV_LOG_OUTPUT: &str = "COLLDIR_LOG_OUTPUT";
pub const ENV_LOG_FILE: &str = "COLLDIR_LOG_FILE";
pub const ENV_LOG_MODULES: &str = "COLLDIR_LOG_MODULES";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = DirectoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(DirectoryError::ConfigError(format!(
                "Invalid log format: {} (must be 'json' or 'text')",
                other
            ))),
        }
    }
}

/// Where log lines go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LogOutput {
    #[serde(rename = "stdout")]
    Stdout,
    #[default]
    #[serde(rename = "stderr")]
    Stderr,
    #[serde(rename = "file")]
    File,
    #[serde(rename = "file+stderr")]
    FileAndStderr,
    /// stdout and stderr
    #[serde(rename = "both")]
    Both,
}

impl LogOutput {
    fn writes_file(self) -> bool {
        matches!(self, LogOutput::File | LogOutput::FileAndStderr)
    }

    fn terminal(self) -> Option<BoxMakeWriter> {
        match self {
            LogOutput::Stdout => Some(BoxMakeWriter::new(std::io::stdout)),
            LogOutput::Stderr | LogOutput::FileAndStderr => Some(BoxMakeWriter::new(std::io::stderr)),
            LogOutput::Both => Some(BoxMakeWriter::new(std::io::stdout.and(std::io::stderr))),
            LogOutput::File => None,
        }
    }

    fn make_writer(self, config_file: Option<PathBuf>) -> Result<BoxMakeWriter, DirectoryError> {
        let terminal = self.terminal();
        if !self.writes_file() {
            return Ok(terminal.unwrap_or_else(|| BoxMakeWriter::new(std::io::stderr)));
        }
        let file = Arc::new(open_log_file(resolve_log_file_path(None, config_file)?)?);
        Ok(match terminal {
            Some(terminal) => BoxMakeWriter::new(file.and(terminal)),
            None => BoxMakeWriter::new(file),
        })
    }
}

impl FromStr for LogOutput {
    type Err = DirectoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "stdout" => Ok(LogOutput::Stdout),
            "stderr" => Ok(LogOutput::Stderr),
            "file" => Ok(LogOutput::File),
            "file+stderr" => Ok(LogOutput::FileAndStderr),
            "both" => Ok(LogOutput::Both),
            other => Err(DirectoryError::ConfigError(format!(
                "Invalid log output: {} (must be 'stdout', 'stderr', 'file', 'file+stderr', or 'both')",
                other
            ))),
        }
    }
}

impl stdfmt::Display for LogOutput {
    fn fmt(&self, f: &mut stdfmt::Formatter<'_>) -> stdfmt::Result {
        f.write_str(match self {
            LogOutput::Stdout => "stdout",
            LogOutput::Stderr => "stderr",
            LogOutput::File => "file",
            LogOutput::FileAndStderr => "file+stderr",
            LogOutput::Both => "both",
        })
    }
}

/// Logging section of the configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub enabled: bool,

    /// trace, debug, info, warn, error, off
    pub level: String,

    pub format: LogFormat,

    pub output: LogOutput,

    /// Log file when output includes a file; `None` uses the state directory.
    pub file: Option<PathBuf>,

    /// ANSI colors for text output on a terminal stream.
    pub color: bool,

    /// Per-module levels, e.g. `"colldir::registry" = "debug"`.
    pub modules: BTreeMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: "info".to_string(),
            format: LogFormat::Text,
            output: LogOutput::Stderr,
            file: None,
            color: true,
            modules: BTreeMap::new(),
        }
    }
}

/// Resolve the log file path: CLI, then `COLLDIR_LOG_FILE`, then config, then
/// the platform state directory.
pub fn resolve_log_file_path(
    cli_file: Option<PathBuf>,
    config_file: Option<PathBuf>,
) -> Result<PathBuf, DirectoryError> {
    let env_file = std::env::var(ENV_LOG_FILE).ok().map(PathBuf::from);
    [cli_file, env_file, config_file]
        .into_iter()
        .flatten()
        .find(|p| !p.as_os_str().is_empty())
        .map(Ok)
        .unwrap_or_else(default_log_file_path)
}

fn default_log_file_path() -> Result<PathBuf, DirectoryError> {
    let dirs = directories::ProjectDirs::from("", "colldir", "colldir").ok_or_else(|| {
        DirectoryError::ConfigError("Could not determine platform directories for log file".into())
    })?;
    let dir = dirs.state_dir().unwrap_or_else(|| dirs.cache_dir());
    Ok(dir.join("colldir.log"))
}

fn open_log_file(path: PathBuf) -> Result<std::fs::File, DirectoryError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| DirectoryError::ConfigError(format!("Failed to open log file {:?}: {}", path, e)))
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(config: Option<&LoggingConfig>) -> Result<(), DirectoryError> {
    let defaults = LoggingConfig::default();
    let config = config.unwrap_or(&defaults);
    let already = |e: tracing_subscriber::util::TryInitError| {
        DirectoryError::ConfigError(format!("Logging already initialized: {}", e))
    };

    if !config.enabled {
        return Registry::default()
            .with(EnvFilter::new("off"))
            .with(fmt::layer().with_writer(std::io::sink))
            .try_init()
            .map_err(already);
    }

    let filter = build_env_filter(config)?;
    let format = env_override(ENV_LOG_FORMAT)?.unwrap_or(config.format);
    let output = env_override(ENV_LOG_OUTPUT)?.unwrap_or(config.output);
    let ansi = format == LogFormat::Text && !output.writes_file() && config.color;

    let layer = fmt::layer()
        .with_target(true)
        .with_timer(ChronoUtc::rfc_3339())
        .with_ansi(ansi)
        .with_writer(output.make_writer(config.file.clone())?);
    let registry = Registry::default().with(filter);
    match format {
        LogFormat::Json => registry.with(layer.json()).try_init().map_err(already),
        LogFormat::Text => registry.with(layer).try_init().map_err(already),
    }
}

fn env_override<T: FromStr<Err = DirectoryError>>(var: &str) -> Result<Option<T>, DirectoryError> {
    match std::env::var(var) {
        Ok(value) if !value.trim().is_empty() => value.parse().map(Some),
        _ => Ok(None),
    }
}

/// `COLLDIR_LOG` wins outright; otherwise the configured level plus module
/// directives from config and `COLLDIR_LOG_MODULES`.
fn build_env_filter(config: &LoggingConfig) -> Result<EnvFilter, DirectoryError> {
    if let Ok(filter) = EnvFilter::try_from_env(ENV_LOG) {
        return Ok(filter);
    }
    if config.level == "off" {
        return Ok(EnvFilter::new("off"));
    }

    let env_modules = std::env::var(ENV_LOG_MODULES).unwrap_or_default();
    let directives = config
        .modules
        .iter()
        .map(|(module, level)| format!("{}={}", module, level))
        .chain(
            env_modules
                .split(',')
                .filter_map(|entry| entry.split_once('='))
                .map(|(module, level)| format!("{}={}", module.trim(), level.trim())),
        );

    let mut filter = EnvFilter::new(&config.level);
    for directive in directives {
        let parsed = directive.parse().map_err(|e| {
            DirectoryError::ConfigError(format!("Invalid log directive {:?}: {}", directive, e))
        })?;
        filter = filter.add_directive(parsed);
    }
    Ok(filter)
}
