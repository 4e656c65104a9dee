use axum::{
    extract::State,
    http::{header, HeaderMap, Uri},
    response::{Html, IntoResponse, Response},
};
use std::sync::Arc;

use crate::{emit, error::AppError, pipeline::Fetcher};

/// Polling graph page, served for every non-JSON request
pub const GRAPH_PAGE: &str = include_str!("graph.html");

#[derive(Clone)]
pub struct AppState {
    pub fetcher: Arc<Fetcher>,
}

/// Catch-all handler: the request path names the exporter to scrape
pub async fn handle_request(State(state): State<AppState>, uri: Uri, headers: HeaderMap) -> Response {
    if !wants_json(&headers) {
        return Html(GRAPH_PAGE).into_response();
    }

    match scrape_json(&state, uri.path()).await {
        Ok(body) => ([(header::CONTENT_TYPE, "application/json")], body).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn scrape_json(state: &AppState, path: &str) -> Result<Vec<u8>, AppError> {
    let url = crate::pipeline::target_url(path)?;
    let handle = state.fetcher.spawn(url);
    let records = emit::collect(handle).await?;
    emit::render_json(&records)
}

/// True when any media range in `Accept` is `application/json`
fn wants_json(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::ACCEPT)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|range| {
            range
                .split(';')
                .next()
                .map(|media| media.trim().eq_ignore_ascii_case("application/json"))
                .unwrap_or(false)
        })
}
