//! SSE event firehose for a single session.
//!
//! Replays the session's ring buffer, then bridges live bus events through
//! an mpsc channel into the response body. The bus subscription is dropped
//! when the client disconnects; a slow client loses events rather than
//! blocking the dispatch path.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use tripwire_core::event::BusEvent;

use crate::AppState;
use crate::error::ProxyError;

/// Grace period in `once` mode: replay, wait briefly for stragglers, close.
const ONCE_LINGER: Duration = Duration::from_millis(50);

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub session_id: Option<String>,
    /// `once=1` closes the stream right after replay instead of staying
    /// attached.
    pub once: Option<String>,
}

fn frame(event: &BusEvent) -> Option<Bytes> {
    let json = serde_json::to_string(event).ok()?;
    Some(Bytes::from(format!("data: {json}\n\n")))
}

/// `GET /events?session_id=…[&once=1]`.
pub async fn events(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EventsQuery>,
) -> Result<Response, ProxyError> {
    let session_id = query
        .session_id
        .filter(|sid| !sid.is_empty())
        .ok_or_else(|| ProxyError::BadRequest("session_id required".to_string()))?;
    let once = query.once.as_deref() == Some("1");

    let recent = state.bus.recent(&session_id);
    let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(recent.len() + 256);
    for event in &recent {
        if let Some(bytes) = frame(event) {
            let _ = tx.try_send(Ok(bytes));
        }
    }

    let live_tx = tx.clone();
    let sid = session_id.clone();
    let guard = state.bus.subscribe_guarded(move |event| {
        if event.session_id != sid {
            return;
        }
        if let Some(bytes) = frame(event) {
            if live_tx.try_send(Ok(bytes)).is_err() {
                debug!(session_id = %event.session_id, "firehose client lagging, dropping event");
            }
        }
    });

    // The guard's lifetime is tied to the client connection: once mode gets
    // a short linger after replay, otherwise we hold it until the receiver
    // side (the response body) is dropped.
    tokio::spawn(async move {
        if once {
            tokio::time::sleep(ONCE_LINGER).await;
        } else {
            tx.closed().await;
        }
        drop(guard);
    });

    let body = Body::from_stream(ReceiverStream::new(rx));
    Ok((
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response())
}
