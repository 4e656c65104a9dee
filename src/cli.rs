use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "promgraph", version, about = "Live graphs and JSON for Prometheus exporters")]
pub struct Cli {
    /// Configuration file path (optional; defaults apply when missing)
    #[arg(short, long, default_value = "promgraph.toml", global = true)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the server (default)
    Start {
        /// Address to listen on, e.g. ":8000" or "127.0.0.1:8000"
        #[arg(short, long, env = "PROMGRAPH_ADDR")]
        addr: Option<String>,
    },

    /// Scrape one exporter and print its metric families as JSON
    Fetch {
        /// Exporter as host[:port][/path], or a full http(s) URL
        target: String,

        /// Pretty-print the JSON output
        #[arg(short, long)]
        pretty: bool,
    },

    /// Configuration management commands
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommands {
    /// Display the effective configuration
    Show,

    /// Validate configuration file
    Validate,
}

impl Cli {
    /// Get the command to execute, defaulting to Start if none provided
    pub fn get_command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Start { addr: None })
    }
}
