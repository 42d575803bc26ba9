//! Proxy-side error type and its HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use tripwire_core::error::{ConfigError, RecorderError};

/// Errors surfaced by proxy handlers and pipeline wiring.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Recorder(#[from] RecorderError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to encode metrics: {0}")]
    MetricsEncode(String),
}

impl ProxyError {
    fn status(&self) -> StatusCode {
        match self {
            ProxyError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ProxyError::Io(_)
            | ProxyError::Recorder(_)
            | ProxyError::Config(_)
            | ProxyError::MetricsEncode(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}
