use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;

use promgraph::{config, init_tracing};

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();

    // Configuration first: it decides the log level and format
    let cfg = config::load_config(&args.config)?;
    init_tracing(&cfg.server.log_level, &cfg.server.log_format);

    match args.get_command() {
        cli::Commands::Start { addr } => {
            commands::start::execute(cfg, addr).await?;
        }
        cli::Commands::Fetch { target, pretty } => {
            commands::fetch::execute(cfg, &target, pretty).await?;
        }
        cli::Commands::Config { action } => match action {
            cli::ConfigCommands::Show => commands::config::show(&cfg)?,
            cli::ConfigCommands::Validate => commands::config::validate(&cfg, &args.config),
        },
        cli::Commands::Version => {
            println!("promgraph v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
