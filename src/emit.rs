//! Consumer side of the pipeline: normalize and encode one scrape
//!
//! The whole result is buffered and encoded before any response is written, so
//! a failed scrape never leaves a partial JSON body behind.

use tracing::{debug, error};

use crate::error::AppError;
use crate::normalize::{normalize, MetricFamilyRecord};
use crate::pipeline::FetchHandle;

/// Drain the handoff channel, normalizing every family in arrival order.
///
/// Records are only returned once the producer reports success; on any
/// failure everything accumulated so far is discarded.
pub async fn collect(handle: FetchHandle) -> Result<Vec<MetricFamilyRecord>, AppError> {
    let FetchHandle {
        url,
        mut families,
        outcome,
    } = handle;

    let mut records = Vec::new();
    while let Some(family) = families.recv().await {
        match normalize(family) {
            Ok(record) => records.push(record),
            Err(e) => {
                outcome.abort();
                return Err(e.into());
            }
        }
    }

    let outcome = outcome
        .await
        .map_err(|e| AppError::Internal(format!("fetch task for {:?} failed: {}", url, e)))??;

    debug!(
        url = %url,
        strategy = %outcome.strategy,
        records = records.len(),
        "collected metric families"
    );
    Ok(records)
}

/// Encode records as a JSON array. A failure here is final.
pub fn render_json(records: &[MetricFamilyRecord]) -> Result<Vec<u8>, AppError> {
    serde_json::to_vec(records).map_err(|e| {
        error!(error = %e, "failed to encode metric families as JSON");
        AppError::Serialization(e)
    })
}
