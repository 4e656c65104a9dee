//! Fetch command implementation
//!
//! Runs one scrape through the same pipeline the server uses and prints the
//! normalized families to stdout.

use anyhow::Result;
use colored::Colorize;
use promgraph::{config::Config, emit, pipeline::Fetcher};
use std::sync::Arc;

pub async fn execute(cfg: Config, target: &str, pretty: bool) -> Result<()> {
    let url = build_target_url(target)?;
    let fetcher = Arc::new(Fetcher::new(cfg.fetch)?);

    let records = match emit::collect(fetcher.spawn(url.clone())).await {
        Ok(records) => records,
        Err(e) => {
            eprintln!("{} {}", "Scrape failed:".red().bold(), e);
            return Err(e.into());
        }
    };

    let output = if pretty {
        serde_json::to_string_pretty(&records)?
    } else {
        String::from_utf8(emit::render_json(&records)?)?
    };
    println!("{}", output);

    Ok(())
}

/// Accept `host[:port][/path]` like the server does, or a full URL
fn build_target_url(target: &str) -> Result<String> {
    let target = target.trim();
    if target.is_empty() {
        anyhow::bail!("Target must not be empty");
    }
    if target.contains("://") {
        return Ok(target.to_string());
    }
    Ok(promgraph::pipeline::target_url(&format!("/{}", target))?)
}
