//! Command implementations for the CLI
//!
//! - start: run the graph server
//! - fetch: scrape one exporter and print JSON
//! - config: configuration display and validation

pub mod config;
pub mod fetch;
pub mod start;
