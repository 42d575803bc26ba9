//! Mock OpenAI-compatible upstream for demos and manual testing.
//!
//! Streams a scripted token sequence as chat-completion SSE deltas and
//! records every request body for inspection at `/_admin/history`.
//! Script the tokens with `MOCK_TOKENS` (pipe-separated) to exercise the
//! proxy's tripwires, e.g. `MOCK_TOKENS='thinking|sudo rm -rf /|done'`.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Json, State};
use axum::response::sse::{Event, Sse};
use axum::routing::{get, post};
use axum::Router;
use futures_util::stream::{self, Stream};
use serde_json::json;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::info;

const DEFAULT_TOKENS: &str = "Hello| there|, how| can I help?";
const TOKEN_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Clone)]
struct MockState {
    history: Arc<Mutex<Vec<serde_json::Value>>>,
    tokens: Arc<Vec<String>>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let tokens: Vec<String> = std::env::var("MOCK_TOKENS")
        .unwrap_or_else(|_| DEFAULT_TOKENS.to_string())
        .split('|')
        .map(str::to_string)
        .collect();
    let state = MockState {
        history: Arc::new(Mutex::new(Vec::new())),
        tokens: Arc::new(tokens),
    };

    let app = Router::new()
        .route("/v1/chat/completions", post(mock_chat))
        .route("/_admin/history", get(admin_history))
        .route("/health", get(|| async { "ok" }))
        .with_state(state);

    let port: u16 = std::env::var("MOCK_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(1234);
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "mock LLM listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Capture the request, then stream the scripted tokens as OpenAI-shaped
/// deltas followed by `[DONE]`.
async fn mock_chat(
    State(state): State<MockState>,
    Json(payload): Json<serde_json::Value>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    state.history.lock().await.push(payload);

    let tokens = Arc::clone(&state.tokens);
    let total = tokens.len();
    let stream = stream::unfold(0usize, move |i| {
        let tokens = Arc::clone(&tokens);
        async move {
            if i > total {
                return None;
            }
            sleep(TOKEN_INTERVAL).await;
            let event = if i == total {
                Event::default().data("[DONE]")
            } else {
                let frame = json!({ "choices": [{ "delta": { "content": tokens[i] } }] });
                Event::default().data(frame.to_string())
            };
            Some((Ok(event), i + 1))
        }
    });

    Sse::new(stream)
}

async fn admin_history(State(state): State<MockState>) -> Json<Vec<serde_json::Value>> {
    Json(state.history.lock().await.clone())
}
