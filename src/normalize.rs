//! Normalization of decoded metric families into the JSON schema
//!
//! A family is either summary-shaped (`type == SUMMARY`) or scalar-shaped
//! (everything else); every record in one family has the same shape.
//! Numbers are rendered as decimal text with full round-trip precision.

use std::collections::BTreeMap;

use serde::{Serialize, Serializer};
use thiserror::Error;
use tracing::debug;

use crate::model::{Metric, MetricFamily, MetricType};

/// Label name to value. Duplicate label names in one sample: the last one wins.
pub type Labels = BTreeMap<String, String>;

#[derive(Debug, Error, PartialEq)]
pub enum NormalizeError {
    #[error("metric family {family:?} mixes summary and scalar samples (sample {index})")]
    MixedShape { family: String, index: usize },
}

/// One metric family in canonical form
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricFamilyRecord {
    pub name: String,
    pub help: String,
    #[serde(rename = "type", serialize_with = "type_name")]
    pub metric_type: MetricType,
    pub metrics: Vec<MetricRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuantileValue {
    pub quantile: f64,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetricRecord {
    Scalar {
        labels: Labels,
        #[serde(serialize_with = "decimal")]
        value: f64,
    },
    Summary {
        labels: Labels,
        #[serde(serialize_with = "quantile_map")]
        quantiles: Vec<QuantileValue>,
        #[serde(serialize_with = "count_text")]
        count: u64,
        #[serde(serialize_with = "decimal")]
        sum: f64,
    },
}

impl MetricRecord {
    pub fn labels(&self) -> &Labels {
        match self {
            Self::Scalar { labels, .. } | Self::Summary { labels, .. } => labels,
        }
    }

    pub fn is_summary(&self) -> bool {
        matches!(self, Self::Summary { .. })
    }
}

/// Convert one decoded family into its canonical record
pub fn normalize(family: MetricFamily) -> Result<MetricFamilyRecord, NormalizeError> {
    let metric_type = family_type(&family);
    let name = family.name.unwrap_or_default();
    let help = family.help.unwrap_or_default();

    let metrics = match metric_type {
        MetricType::Summary => family
            .metric
            .into_iter()
            .enumerate()
            .map(|(index, metric)| summary_record(&name, index, metric))
            .collect::<Result<Vec<_>, _>>()?,
        MetricType::Histogram => {
            debug!(family = %name, "histogram buckets are not exposed, emitting zero-valued records");
            scalar_records(&name, family.metric)?
        }
        MetricType::Counter | MetricType::Gauge | MetricType::Untyped => {
            scalar_records(&name, family.metric)?
        }
    };

    Ok(MetricFamilyRecord {
        name,
        help,
        metric_type,
        metrics,
    })
}

/// Render a float as decimal text that parses back to the same value
pub fn format_decimal(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value == f64::INFINITY {
        "+Inf".to_string()
    } else if value == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        value.to_string()
    }
}

fn family_type(family: &MetricFamily) -> MetricType {
    match family.r#type {
        None => MetricType::default(),
        Some(raw) => MetricType::try_from(raw).unwrap_or_else(|_| {
            debug!(family = family.name(), raw_type = raw, "unknown metric type, treating as untyped");
            MetricType::Untyped
        }),
    }
}

fn summary_record(family: &str, index: usize, metric: Metric) -> Result<MetricRecord, NormalizeError> {
    let has_scalar = metric.gauge.is_some()
        || metric.counter.is_some()
        || metric.untyped.is_some()
        || metric.histogram.is_some();
    if metric.summary.is_none() && has_scalar {
        return Err(NormalizeError::MixedShape {
            family: family.to_string(),
            index,
        });
    }

    let labels = make_labels(&metric);
    let summary = metric.summary.unwrap_or_default();
    Ok(MetricRecord::Summary {
        labels,
        quantiles: summary
            .quantile
            .iter()
            .map(|q| QuantileValue {
                quantile: q.quantile(),
                value: q.value(),
            })
            .collect(),
        count: summary.sample_count(),
        sum: summary.sample_sum(),
    })
}

fn scalar_records(family: &str, metrics: Vec<Metric>) -> Result<Vec<MetricRecord>, NormalizeError> {
    metrics
        .into_iter()
        .enumerate()
        .map(|(index, metric)| {
            if metric.summary.is_some() {
                return Err(NormalizeError::MixedShape {
                    family: family.to_string(),
                    index,
                });
            }
            Ok(MetricRecord::Scalar {
                labels: make_labels(&metric),
                value: scalar_value(&metric),
            })
        })
        .collect()
}

/// gauge, then counter, then untyped; zero when none is set
fn scalar_value(metric: &Metric) -> f64 {
    if let Some(gauge) = &metric.gauge {
        return gauge.value();
    }
    if let Some(counter) = &metric.counter {
        return counter.value();
    }
    if let Some(untyped) = &metric.untyped {
        return untyped.value();
    }
    0.0
}

fn make_labels(metric: &Metric) -> Labels {
    metric
        .label
        .iter()
        .map(|pair| (pair.name().to_string(), pair.value().to_string()))
        .collect()
}

fn type_name<S: Serializer>(metric_type: &MetricType, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(metric_type.as_str_name())
}

fn decimal<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_decimal(*value))
}

fn count_text<S: Serializer>(count: &u64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(count)
}

/// Sorted by rendered quantile. A repeated quantile: the last one wins.
fn quantile_map<S: Serializer>(quantiles: &[QuantileValue], serializer: S) -> Result<S::Ok, S::Error> {
    let map: BTreeMap<String, String> = quantiles
        .iter()
        .map(|q| (format_decimal(q.quantile), format_decimal(q.value)))
        .collect();
    serializer.collect_map(map)
}
