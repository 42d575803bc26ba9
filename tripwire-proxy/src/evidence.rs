//! Evidence retrieval: the in-memory packet and the NDJSON export.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::{Value, json};

use tripwire_core::event::EventType;

use crate::AppState;
use crate::error::ProxyError;

#[derive(Debug, Deserialize)]
pub struct EvidenceQuery {
    pub session_id: Option<String>,
    /// Export only: keep the last N matching lines.
    pub tail: Option<usize>,
}

fn require_session_id(query: &EvidenceQuery) -> Result<&str, ProxyError> {
    query
        .session_id
        .as_deref()
        .filter(|sid| !sid.is_empty())
        .ok_or_else(|| ProxyError::BadRequest("session_id required".to_string()))
}

/// `GET /evidence?session_id=…` — summary packet assembled from the
/// session's ring buffer: the most recent rule fire, the score timeline,
/// and tool-call activity.
pub async fn evidence_packet(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EvidenceQuery>,
) -> Result<Json<Value>, ProxyError> {
    let session_id = require_session_id(&query)?;
    let recent = state.bus.recent(session_id);

    let last_rule = recent
        .iter()
        .rev()
        .find(|ev| ev.kind == EventType::RuleFire)
        .map(|ev| ev.payload.clone())
        .unwrap_or(Value::Null);
    let score_timeline: Vec<Value> = recent
        .iter()
        .filter(|ev| ev.kind == EventType::ScoreUpdate)
        .map(|ev| ev.payload.clone())
        .collect();
    let last_tools: Vec<Value> = recent
        .iter()
        .filter(|ev| {
            matches!(ev.kind, EventType::ToolCallStart | EventType::ToolCallEnd)
        })
        .map(|ev| serde_json::to_value(ev).unwrap_or(Value::Null))
        .collect();

    Ok(Json(json!({
        "last_rule": last_rule,
        "score_timeline": score_timeline,
        "last_tools": last_tools,
    })))
}

/// `GET /evidence/export?session_id=…[&tail=N]` — the session's redacted
/// NDJSON lines straight from the evidence log.
pub async fn evidence_export(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EvidenceQuery>,
) -> Result<Response, ProxyError> {
    let session_id = require_session_id(&query)?.to_string();

    let text = match tokio::fs::read_to_string(state.recorder.path()).await {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(err) => return Err(err.into()),
    };

    let mut lines: Vec<&str> = text
        .lines()
        .filter(|line| {
            serde_json::from_str::<Value>(line)
                .map(|v| v["sessionId"] == session_id.as_str())
                .unwrap_or(false)
        })
        .collect();
    if let Some(tail) = query.tail {
        let skip = lines.len().saturating_sub(tail);
        lines.drain(..skip);
    }

    let mut body = lines.join("\n");
    if !body.is_empty() {
        body.push('\n');
    }
    Ok((
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        body,
    )
        .into_response())
}
