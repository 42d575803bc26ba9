//! Manual pause/unpause control and the dev event injector.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use tripwire_core::breaker::PauseMode;
use tripwire_core::event::{BusEvent, EventType};

use crate::AppState;
use crate::error::ProxyError;

#[derive(Debug, Deserialize)]
pub struct ControlRequest {
    pub action: String,
    pub session_id: String,
    #[serde(default)]
    pub mode: Option<PauseMode>,
}

/// `POST /control` — `{action: "pause"|"unpause", session_id, mode?}`.
pub async fn control(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ControlRequest>,
) -> Result<Json<Value>, ProxyError> {
    if req.session_id.is_empty() {
        return Err(ProxyError::BadRequest("session_id required".to_string()));
    }
    match req.action.as_str() {
        "pause" => {
            let mode = req.mode.unwrap_or(PauseMode::Agent);
            info!(session_id = %req.session_id, mode = mode.as_str(), "manual pause");
            state.breaker.pause(&req.session_id, mode);
            Ok(Json(json!({ "ok": true, "paused": true })))
        }
        "unpause" => {
            info!(session_id = %req.session_id, "manual unpause");
            state.breaker.unpause(&req.session_id);
            Ok(Json(json!({ "ok": true, "paused": false })))
        }
        other => Err(ProxyError::BadRequest(format!("unknown action {other:?}"))),
    }
}

#[derive(Debug, Deserialize)]
pub struct DevEmitRequest {
    #[serde(default = "default_session_id")]
    pub session_id: String,
    #[serde(rename = "type", default = "default_event_type")]
    pub kind: EventType,
    #[serde(default)]
    pub payload: Value,
}

fn default_session_id() -> String {
    "demo".to_string()
}

fn default_event_type() -> EventType {
    EventType::Token
}

/// `POST /dev/emit` — inject an event without an upstream, for demos and
/// tests.
pub async fn dev_emit(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DevEmitRequest>,
) -> Json<Value> {
    state
        .bus
        .publish(BusEvent::new(req.session_id, req.kind, req.payload));
    Json(json!({ "ok": true }))
}
