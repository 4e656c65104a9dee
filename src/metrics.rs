use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

use crate::negotiate::DecodeStrategy;

/// Install the global Prometheus recorder for self-metrics
pub fn init_metrics() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus recorder: {}", e))?;

    init_metric_descriptions();

    Ok(handle)
}

/// Initialize metric descriptions (can be called multiple times safely)
fn init_metric_descriptions() {
    describe_counter!(
        "promgraph_fetches_total",
        "Exporter scrapes by outcome"
    );
    describe_histogram!(
        "promgraph_fetch_duration_seconds",
        "Time from issuing a scrape to the end of decoding"
    );
    describe_counter!(
        "promgraph_families_decoded_total",
        "Metric families decoded, by exposition format"
    );
    describe_gauge!(
        "promgraph_build_info",
        "Build information"
    );

    gauge!("promgraph_build_info", "version" => env!("CARGO_PKG_VERSION")).set(1.0);
}

/// Record one finished scrape
pub fn record_fetch(outcome: &str, duration: Duration) {
    counter!("promgraph_fetches_total", "outcome" => outcome.to_string()).increment(1);
    histogram!("promgraph_fetch_duration_seconds").record(duration.as_secs_f64());
}

/// Record the families delivered by a successful scrape
pub fn record_families(strategy: DecodeStrategy, count: usize) {
    counter!(
        "promgraph_families_decoded_total",
        "format" => strategy.as_str(),
    )
    .increment(count as u64);
}
