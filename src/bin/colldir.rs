//! Colldir CLI Binary
//!
//! Command-line interface for the collection directory.

use clap::Parser;
use colldir::logging::init_logging;
use colldir::tooling::cli::{Cli, CliContext};
use std::process;

fn main() {
    let cli = Cli::parse();

    let context = match CliContext::new(cli.config.clone(), cli.format) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            process::exit(1);
        }
    };

    let logged = cli
        .logging_config(&context.config().logging)
        .and_then(|logging| init_logging(Some(&logging)));
    if let Err(e) = logged {
        eprintln!("Error initializing logging: {}", e);
        process::exit(1);
    }

    match context.execute(&cli.command) {
        Ok(output) => {
            println!("{}", output);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}
