use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::decode::delimited::DEFAULT_MAX_RECORD_BYTES;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub fetch: FetchConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            log_level: "info".to_string(),
            log_format: "text".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Deadline for one scrape, from sending the request to the last byte
    pub timeout_seconds: u64,
    /// Capacity of the decoder → encoder handoff channel
    pub channel_capacity: usize,
    pub max_record_bytes: usize,
    pub max_body_bytes: usize,
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 10,
            channel_capacity: 1000,
            max_record_bytes: DEFAULT_MAX_RECORD_BYTES,
            max_body_bytes: 32 * 1024 * 1024,
        }
    }
}

/// Self-metrics listener. Served apart from the main listener, whose whole
/// path space names exporter targets.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1".to_string(),
            port: 9464,
        }
    }
}

/// Load configuration from an optional TOML file plus `PROMGRAPH__*` environment overrides
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let config = config::Config::builder()
        .add_source(config::File::from(path).required(false))
        .add_source(config::Environment::with_prefix("PROMGRAPH").separator("__"))
        .build()?;

    let cfg: Config = config.try_deserialize()?;
    validate_config(&cfg)?;

    Ok(cfg)
}

/// Apply a Go-style listen address (`:8000`, `host:port`) to the server section
pub fn apply_listen_addr(cfg: &mut Config, addr: &str) -> anyhow::Result<()> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| anyhow::anyhow!("Listen address {:?} must be host:port or :port", addr))?;

    cfg.server.port = port
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid port in listen address {:?}", addr))?;
    if !host.is_empty() {
        cfg.server.host = host.trim_matches(['[', ']']).to_string();
    }
    Ok(())
}

pub fn validate_config(cfg: &Config) -> anyhow::Result<()> {
    if cfg.server.host.parse::<std::net::IpAddr>().is_err() {
        anyhow::bail!("Server host {:?} is not an IP address", cfg.server.host);
    }

    match cfg.server.log_format.as_str() {
        "text" | "json" => {}
        other => anyhow::bail!("Invalid log format {:?} (expected \"text\" or \"json\")", other),
    }

    if cfg.fetch.timeout_seconds == 0 {
        anyhow::bail!("fetch.timeout_seconds must be greater than zero");
    }

    if cfg.fetch.channel_capacity == 0 {
        anyhow::bail!("fetch.channel_capacity must be greater than zero");
    }

    if cfg.fetch.max_record_bytes == 0 || cfg.fetch.max_body_bytes == 0 {
        anyhow::bail!("fetch size limits must be greater than zero");
    }

    if cfg.metrics.enabled {
        if cfg.metrics.host.parse::<std::net::IpAddr>().is_err() {
            anyhow::bail!("Metrics host {:?} is not an IP address", cfg.metrics.host);
        }
        if cfg.metrics.host == cfg.server.host && cfg.metrics.port == cfg.server.port {
            anyhow::bail!("Metrics listener must not share the server address");
        }
    }

    Ok(())
}
