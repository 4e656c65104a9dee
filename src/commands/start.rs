use anyhow::Result;
use colored::Colorize;
use promgraph::config::{self, Config};
use promgraph::server;
use tracing::info;

/// Execute the start command
///
/// A `--addr` flag overrides the listen address from configuration.
pub async fn execute(mut cfg: Config, addr: Option<String>) -> Result<()> {
    if let Some(addr) = addr {
        config::apply_listen_addr(&mut cfg, &addr)?;
        config::validate_config(&cfg)?;
    }

    println!(
        "{} http://{}:{}/<host:port/path>",
        "Serving exporter graphs at".green(),
        cfg.server.host,
        cfg.server.port
    );
    info!("Starting promgraph in foreground mode");

    // blocks until shutdown
    server::start_server(cfg).await
}
