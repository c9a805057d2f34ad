//! Integration tests for the collection directory

mod cli_parse;
mod http_registry;
mod support;
mod sync_scenarios;
