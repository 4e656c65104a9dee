use anyhow::Result;
use colored::Colorize;
use promgraph::config::Config;
use std::path::Path;
use tracing::info;

/// Execute the config show command
///
/// Prints the effective configuration (file, environment and defaults merged)
pub fn show(cfg: &Config) -> Result<()> {
    println!("{}", "Current Configuration:".green().bold());
    println!();

    let toml_string = toml::to_string_pretty(cfg)?;
    println!("{}", toml_string);

    info!("Configuration displayed successfully");
    Ok(())
}

/// Execute the config validate command
///
/// Loading already validated the configuration; report what is in effect.
pub fn validate(cfg: &Config, path: &Path) {
    println!("{}", "✓ Configuration is valid".green());
    println!();
    println!("{}", "Summary:".bold());
    println!(
        "  Source: {}",
        if path.exists() {
            path.display().to_string()
        } else {
            "built-in defaults (no file found)".to_string()
        }
    );
    println!("  Listen: {}:{}", cfg.server.host, cfg.server.port);
    println!(
        "  Fetch: timeout {}s, channel capacity {}",
        cfg.fetch.timeout_seconds, cfg.fetch.channel_capacity
    );
    println!("  Self-metrics: {}", describe_metrics(cfg));

    info!("Configuration validation successful");
}

fn describe_metrics(cfg: &Config) -> String {
    if cfg.metrics.enabled {
        format!("http://{}:{}/metrics", cfg.metrics.host, cfg.metrics.port)
    } else {
        "disabled".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_metrics() {
        let mut cfg = Config::default();
        assert_eq!(describe_metrics(&cfg), "disabled");

        cfg.metrics.enabled = true;
        assert_eq!(describe_metrics(&cfg), "http://127.0.0.1:9464/metrics");
    }

    #[test]
    fn test_show_default_config() {
        assert!(show(&Config::default()).is_ok());
    }
}
