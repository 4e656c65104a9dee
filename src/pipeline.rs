//! Fetch pipeline: one producer task per inbound request
//!
//! The producer issues the scrape, negotiates the decoder and pushes every
//! decoded `MetricFamily` into a bounded channel as soon as it is available.
//! Closing the channel marks end of stream; the task's `JoinHandle` carries the
//! final success or failure so a truncated stream is never mistaken for a
//! complete one.

use bytes::BytesMut;
use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, StatusCode, Url};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::FetchConfig;
use crate::decode::{text, DelimitedDecoder, ParseError};
use crate::error::AppError;
use crate::metrics;
use crate::model::MetricFamily;
use crate::negotiate::{select_strategy, DecodeStrategy, ACCEPT_HEADER};

/// Result of a completed scrape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOutcome {
    pub strategy: DecodeStrategy,
    pub families: usize,
}

/// Consumer side of one running scrape
pub struct FetchHandle {
    pub url: String,
    /// Decoded families in upstream order; closed when the producer finishes
    pub families: mpsc::Receiver<MetricFamily>,
    /// Final status of the producer, available once `families` is drained
    pub outcome: JoinHandle<Result<FetchOutcome, AppError>>,
}

/// Derive the exporter URL from an inbound request path (`/host:port/path`)
pub fn target_url(path: &str) -> Result<String, AppError> {
    match path.strip_prefix('/') {
        Some(target) if !target.is_empty() => Ok(format!("http://{}", target)),
        _ => Err(AppError::InvalidTarget(
            "expect exporter url in path".to_string(),
        )),
    }
}

/// Shared scrape client. Holds no per-request state.
pub struct Fetcher {
    client: Client,
    config: FetchConfig,
}

impl Fetcher {
    pub fn new(config: FetchConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent(concat!("promgraph/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AppError::Internal(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    /// Start a scrape of `url` on its own task
    pub fn spawn(self: &Arc<Self>, url: String) -> FetchHandle {
        let (tx, rx) = mpsc::channel(self.config.channel_capacity);
        let fetcher = Arc::clone(self);
        let span = info_span!("fetch", request_id = %Uuid::new_v4(), url = %url);
        let task_url = url.clone();

        let outcome = tokio::spawn(async move { fetcher.run(task_url, tx).await }.instrument(span));

        FetchHandle {
            url,
            families: rx,
            outcome,
        }
    }

    async fn run(&self, url: String, tx: mpsc::Sender<MetricFamily>) -> Result<FetchOutcome, AppError> {
        let started = Instant::now();
        let timeout = self.config.timeout();
        let deadline = tokio::time::Instant::now() + timeout;

        let result = tokio::select! {
            res = tokio::time::timeout_at(deadline, self.fetch_into(&url, &tx)) => match res {
                Ok(inner) => inner,
                Err(_) => Err(AppError::Timeout { url: url.clone(), after: timeout }),
            },
            _ = tx.closed() => Err(AppError::Internal("fetch cancelled: consumer went away".to_string())),
        };

        let elapsed = started.elapsed();
        match &result {
            Ok(outcome) => {
                info!(
                    strategy = %outcome.strategy,
                    families = outcome.families,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "scrape completed"
                );
                metrics::record_fetch("success", elapsed);
                metrics::record_families(outcome.strategy, outcome.families);
            }
            Err(e) => {
                warn!(error = %e, elapsed_ms = elapsed.as_millis() as u64, "scrape failed");
                metrics::record_fetch(crate::error::error_type_name(e), elapsed);
            }
        }

        // dropping `tx` here closes the channel on every path
        result
    }

    async fn fetch_into(&self, url: &str, tx: &mpsc::Sender<MetricFamily>) -> Result<FetchOutcome, AppError> {
        let parsed = Url::parse(url)
            .map_err(|e| AppError::RequestConstruction(format!("invalid URL {:?}: {}", url, e)))?;

        let response = self
            .client
            .get(parsed)
            .header(ACCEPT, ACCEPT_HEADER)
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            return Err(AppError::UpstreamStatus {
                url: url.to_string(),
                status: response.status(),
            });
        }

        let strategy = select_strategy(
            response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok()),
        );
        debug!(%strategy, "negotiated exposition format");

        let families = match strategy {
            DecodeStrategy::BinaryDelimited => self.stream_delimited(response, tx).await?,
            DecodeStrategy::TextExposition => self.decode_text(response, tx).await?,
        };

        Ok(FetchOutcome { strategy, families })
    }

    /// Decode records as body chunks arrive and forward each one immediately
    async fn stream_delimited(
        &self,
        response: reqwest::Response,
        tx: &mpsc::Sender<MetricFamily>,
    ) -> Result<usize, AppError> {
        let mut decoder = DelimitedDecoder::new(self.config.max_record_bytes);
        let mut body = response.bytes_stream();
        let mut sent = 0;

        while let Some(chunk) = body.next().await {
            decoder.extend(&chunk.map_err(AppError::Transport)?);
            while let Some(family) = decoder.next_family()? {
                deliver(tx, family).await?;
                sent += 1;
            }
        }

        decoder.finish()?;
        Ok(sent)
    }

    /// Read the whole body, parse it, then forward the families in order
    async fn decode_text(
        &self,
        response: reqwest::Response,
        tx: &mpsc::Sender<MetricFamily>,
    ) -> Result<usize, AppError> {
        let limit = self.config.max_body_bytes;
        let mut buf = BytesMut::new();
        let mut body = response.bytes_stream();

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(AppError::Transport)?;
            if buf.len() + chunk.len() > limit {
                return Err(AppError::Parse(ParseError::new(
                    0,
                    format!("body exceeds {} bytes", limit),
                )));
            }
            buf.extend_from_slice(&chunk);
        }

        let families = text::parse_bytes(&buf)?;
        let count = families.len();
        for family in families {
            deliver(tx, family).await?;
        }
        Ok(count)
    }
}

async fn deliver(tx: &mpsc::Sender<MetricFamily>, family: MetricFamily) -> Result<(), AppError> {
    tx.send(family)
        .await
        .map_err(|_| AppError::Internal("fetch cancelled: consumer went away".to_string()))
}
