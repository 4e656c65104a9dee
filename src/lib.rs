pub mod config;
pub mod decode;
pub mod emit;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod model;
pub mod negotiate;
pub mod normalize;
pub mod pipeline;
pub mod server;
pub mod signals;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize tracing/logging
///
/// `RUST_LOG` takes precedence over the configured level. `log_format = "json"`
/// switches to structured JSON lines.
///
/// Note: This function can only be called once.
pub fn init_tracing(log_level: &str, log_format: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(filter);
    if log_format == "json" {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }
}
