//! Liveness and metrics endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};

use crate::AppState;
use crate::error::ProxyError;

pub async fn root() -> &'static str {
    "tripwire: up"
}

pub async fn health() -> &'static str {
    "ok"
}

/// Encode the registry in OpenMetrics text format.
pub async fn metrics(State(state): State<Arc<AppState>>) -> Result<Response, ProxyError> {
    let mut body = String::new();
    prometheus_client::encoding::text::encode(&mut body, &state.registry)
        .map_err(|err| ProxyError::MetricsEncode(err.to_string()))?;
    Ok((
        [(
            header::CONTENT_TYPE,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        body,
    )
        .into_response())
}
