use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;
use std::time::Duration;

use crate::decode::{DecodeError, ParseError};
use crate::normalize::NormalizeError;

/// Errors that end one inbound request
#[derive(Debug)]
pub enum AppError {
    /// Inbound path does not name an exporter
    InvalidTarget(String),
    /// Outbound request could not be built
    RequestConstruction(String),
    /// Connection or body read failure talking to the exporter
    Transport(reqwest::Error),
    /// Exporter answered with a non-200 status
    UpstreamStatus { url: String, status: StatusCode },
    /// Per-request deadline expired
    Timeout { url: String, after: Duration },
    /// Delimited protobuf stream failed
    Decode(DecodeError),
    /// Text exposition body failed to parse
    Parse(ParseError),
    /// Decoded family does not fit the canonical schema
    Normalize(NormalizeError),
    /// JSON encoding of the result failed
    Serialization(serde_json::Error),
    /// Internal server error
    Internal(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTarget(msg) => write!(f, "Invalid target: {}", msg),
            Self::RequestConstruction(msg) => write!(f, "Cannot build request: {}", msg),
            Self::Transport(err) => write!(f, "Transport error: {}", err),
            Self::UpstreamStatus { url, status } => {
                write!(f, "GET request for URL {:?} returned HTTP status {}", url, status)
            }
            Self::Timeout { url, after } => {
                write!(f, "Fetching {:?} timed out after {:?}", url, after)
            }
            Self::Decode(err) => write!(f, "Reading metric family protocol buffer failed: {}", err),
            Self::Parse(err) => write!(f, "Reading text format failed: {}", err),
            Self::Normalize(err) => write!(f, "Invalid metric family: {}", err),
            Self::Serialization(err) => write!(f, "Serialization error: {}", err),
            Self::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidTarget(_) => StatusCode::BAD_REQUEST,
            Self::RequestConstruction(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Transport(_) => StatusCode::BAD_GATEWAY,
            Self::UpstreamStatus { .. } => StatusCode::BAD_GATEWAY,
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::Decode(_) | Self::Parse(_) | Self::Normalize(_) => StatusCode::BAD_GATEWAY,
            Self::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "message": self.to_string(),
                "type": error_type_name(&self),
            }
        }));

        (self.status(), body).into_response()
    }
}

pub fn error_type_name(error: &AppError) -> &'static str {
    match error {
        AppError::InvalidTarget(_) => "invalid_target",
        AppError::RequestConstruction(_) => "request_construction_error",
        AppError::Transport(_) => "transport_error",
        AppError::UpstreamStatus { .. } => "unexpected_status",
        AppError::Timeout { .. } => "timeout",
        AppError::Decode(_) => "decode_error",
        AppError::Parse(_) => "parse_error",
        AppError::Normalize(_) => "normalize_error",
        AppError::Serialization(_) => "serialization_error",
        AppError::Internal(_) => "internal_error",
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            Self::RequestConstruction(err.to_string())
        } else {
            Self::Transport(err)
        }
    }
}

impl From<DecodeError> for AppError {
    fn from(err: DecodeError) -> Self {
        Self::Decode(err)
    }
}

impl From<ParseError> for AppError {
    fn from(err: ParseError) -> Self {
        Self::Parse(err)
    }
}

impl From<NormalizeError> for AppError {
    fn from(err: NormalizeError) -> Self {
        Self::Normalize(err)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err)
    }
}
