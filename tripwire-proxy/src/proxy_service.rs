//! Chat-completions forwarding with an inline SSE tee.
//!
//! The proxy mirrors upstream bytes to the client unchanged while parsing
//! `data:` frames for `choices[].delta.content` and publishing each delta as
//! a `Token` event. The read loop selects on the session's cancellation
//! token every chunk, so a pause (hard rule, threshold, or manual) tears the
//! stream down within one chunk interval.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use chrono::Utc;
use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tripwire_core::event::{BusEvent, CHANNEL_FINAL};
use tripwire_core::session::derive_session_id;

use crate::AppState;
use crate::error::ProxyError;

/// `POST /v1/chat/completions`.
pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ProxyError> {
    let model = serde_json::from_slice::<Value>(&body)
        .ok()
        .and_then(|v| v["model"].as_str().map(str::to_string))
        .unwrap_or_else(|| "unknown-model".to_string());
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let api_key_last4 = authorization.as_deref().map(last4);
    let client_addr = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("127.0.0.1");

    let session_id = derive_session_id(
        &headers,
        &model,
        api_key_last4,
        client_addr,
        Utc::now().timestamp_millis(),
    );

    state.bus.publish(BusEvent::session_start(&session_id));

    if state.breaker.is_paused(&session_id) {
        info!(%session_id, "rejecting request for paused session");
        return Ok((StatusCode::LOCKED, "Paused").into_response());
    }

    let token = state.breaker.cancellation(&session_id);
    let target = join_upstream(&state.upstream_url);

    let mut request = state
        .upstream
        .post(&target)
        .header(header::CONTENT_TYPE, "application/json")
        .body(body);
    if let Some(auth) = &authorization {
        request = request.header(header::AUTHORIZATION, auth);
    }

    let upstream = match request.send().await {
        Ok(resp) => resp,
        Err(err) => {
            warn!(%session_id, %target, error = %err, "upstream request failed");
            state.metrics.record_stream_outcome("upstream_error");
            state.bus.publish(BusEvent::session_end(&session_id));
            return Err(err.into());
        }
    };

    let status = upstream.status();
    let content_type = upstream
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();

    if content_type.contains("text/event-stream") {
        let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(32);
        tokio::spawn(tee_stream(state, session_id, token, upstream, tx));
        let body = Body::from_stream(ReceiverStream::new(rx));
        return Ok((status, [(header::CONTENT_TYPE, content_type)], body).into_response());
    }

    let bytes = upstream.bytes().await;
    state.bus.publish(BusEvent::session_end(&session_id));
    let bytes = bytes?;
    Ok((status, [(header::CONTENT_TYPE, content_type)], bytes).into_response())
}

/// Mirror upstream chunks to the client while publishing token deltas, until
/// the stream ends, the client goes away, or the session is cancelled.
async fn tee_stream(
    state: Arc<AppState>,
    session_id: String,
    token: CancellationToken,
    upstream: reqwest::Response,
    tx: mpsc::Sender<Result<Bytes, std::io::Error>>,
) {
    let mut stream = upstream.bytes_stream();
    let mut carry = String::new();

    let outcome = loop {
        tokio::select! {
            _ = token.cancelled() => break "contained",
            chunk = stream.next() => match chunk {
                Some(Ok(bytes)) => {
                    if tx.send(Ok(bytes.clone())).await.is_err() {
                        break "client_closed";
                    }
                    let text = String::from_utf8_lossy(&bytes);
                    for delta in extract_deltas(&mut carry, &text) {
                        state
                            .bus
                            .publish(BusEvent::token(&session_id, &delta, CHANNEL_FINAL));
                    }
                }
                Some(Err(err)) => {
                    warn!(%session_id, error = %err, "upstream stream failed");
                    break "upstream_error";
                }
                None => break "completed",
            }
        }
    };

    info!(%session_id, outcome, "stream ended");
    state.metrics.record_stream_outcome(outcome);
    state.bus.publish(BusEvent::session_end(&session_id));
}

/// Append the chat-completions path, tolerating bases with or without a
/// trailing `/v1`.
fn join_upstream(base: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.ends_with("/v1") {
        format!("{base}/chat/completions")
    } else {
        format!("{base}/v1/chat/completions")
    }
}

/// Last four characters of a header value, the coarse key fingerprint used
/// for session derivation.
fn last4(value: &str) -> &str {
    let start = value
        .char_indices()
        .rev()
        .nth(3)
        .map(|(idx, _)| idx)
        .unwrap_or(0);
    &value[start..]
}

/// Accumulate `chunk` into `carry`, consume complete `\n\n`-terminated SSE
/// frames, and return the `choices[].delta.content` strings found in them.
/// Incomplete frames stay in `carry` for the next chunk.
fn extract_deltas(carry: &mut String, chunk: &str) -> Vec<String> {
    carry.push_str(chunk);
    let mut deltas = Vec::new();
    while let Some(end) = carry.find("\n\n") {
        let frame: String = carry.drain(..end + 2).collect();
        for line in frame.lines() {
            let Some(data) = line.trim().strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();
            if data == "[DONE]" {
                continue;
            }
            let Ok(value) = serde_json::from_str::<Value>(data) else {
                continue;
            };
            let Some(choices) = value["choices"].as_array() else {
                continue;
            };
            for choice in choices {
                if let Some(text) = choice["delta"]["content"].as_str() {
                    if !text.is_empty() {
                        deltas.push(text.to_string());
                    }
                }
            }
        }
    }
    deltas
}
