pub mod graph;
pub mod metrics_handler;
