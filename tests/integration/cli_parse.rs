//! Command-line parsing.

use clap::Parser;
use colldir::tooling::cli::{CacheCommands, Cli, Commands, ConfigCommands, OutputFormat};
use std::path::PathBuf;

#[test]
fn defaults_to_text_output() {
    let cli = Cli::try_parse_from(["colldir", "sync"]).unwrap();
    assert!(matches!(cli.command, Commands::Sync));
    assert_eq!(cli.format, OutputFormat::Text);
    assert!(cli.config.is_none());
}

#[test]
fn global_options_before_subcommand() {
    let cli = Cli::try_parse_from([
        "colldir",
        "--config",
        "/etc/colldir.toml",
        "--log-output",
        "file",
        "--log-file",
        "/tmp/colldir.log",
        "cache",
        "info",
    ])
    .unwrap();
    assert_eq!(cli.config, Some(PathBuf::from("/etc/colldir.toml")));
    assert_eq!(cli.log_output.as_deref(), Some("file"));
    assert!(matches!(
        cli.command,
        Commands::Cache {
            command: CacheCommands::Info
        }
    ));
}

#[test]
fn nested_subcommands() {
    let cli = Cli::try_parse_from(["colldir", "config", "show", "--format", "json"]).unwrap();
    assert!(matches!(
        cli.command,
        Commands::Config {
            command: ConfigCommands::Show
        }
    ));
    assert_eq!(cli.format, OutputFormat::Json);

    let cli = Cli::try_parse_from(["colldir", "cache", "clear"]).unwrap();
    assert!(matches!(
        cli.command,
        Commands::Cache {
            command: CacheCommands::Clear
        }
    ));
}

#[test]
fn filter_takes_a_positional_expression() {
    let cli = Cli::try_parse_from(["colldir", "filter", "obs_regime=Optical && bib_year>2010"])
        .unwrap();
    match cli.command {
        Commands::Filter { expression } => {
            assert_eq!(expression, "obs_regime=Optical && bib_year>2010")
        }
        other => panic!("unexpected command {:?}", other),
    }
}

#[test]
fn region_requires_all_coordinates() {
    assert!(Cli::try_parse_from(["colldir", "region", "--ra", "10"]).is_err());
    assert!(Cli::try_parse_from(["colldir", "frobnicate"]).is_err());
}
