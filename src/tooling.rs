//! Tooling & Integration Layer
//!
//! Command-line front end for the collection directory.

pub mod cli;

pub use cli::{CacheCommands, Cli, CliContext, Commands, ConfigCommands, OutputFormat};
