//! Decoded exposition data
//!
//! Both the binary and the text decoders produce `proto::MetricFamily` values,
//! so everything downstream of content negotiation works on one representation.

pub mod proto;

pub use proto::{LabelPair, Metric, MetricFamily, MetricType};
