//! HTTP boundary for the tripwire safety-monitoring proxy.
//!
//! Sits between an agent-facing client and an OpenAI-compatible upstream,
//! tees streamed completion tokens onto the core event bus for analysis, and
//! exposes the control surface: SSE event firehose, pause/unpause control,
//! evidence packet and export, health, and metrics.

pub mod admin;
pub mod control;
pub mod error;
pub mod events;
pub mod evidence;
pub mod metrics;
pub mod proxy_service;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use prometheus_client::registry::Registry;

use tripwire_core::analyzer::Analyzer;
use tripwire_core::breaker::CircuitBreaker;
use tripwire_core::bus::EventBus;
use tripwire_core::config::TripwireConfig;
use tripwire_core::recorder::Recorder;

use crate::error::ProxyError;
use crate::metrics::TripwireMetrics;

/// Default upstream when neither a CLI override nor a configured provider
/// is present (a local OpenAI-compatible server).
pub const DEFAULT_UPSTREAM: &str = "http://localhost:1234/v1";

/// Shared state for all routes.
pub struct AppState {
    pub bus: Arc<EventBus>,
    pub breaker: Arc<CircuitBreaker>,
    /// Held so the analyzer's bus subscription lives as long as the state.
    pub analyzer: Arc<Analyzer>,
    pub recorder: Arc<Recorder>,
    pub metrics: TripwireMetrics,
    pub registry: Arc<Registry>,
    pub upstream: reqwest::Client,
    pub upstream_url: String,
}

/// Wire the full pipeline from configuration.
///
/// Subscription order matters: the recorder attaches first so a token that
/// triggers containment is on disk before its side effects; the metrics
/// observer is next; the analyzer attaches last.
pub fn build_state(
    config: &TripwireConfig,
    upstream_url: Option<String>,
) -> Result<Arc<AppState>, ProxyError> {
    let bus = Arc::new(EventBus::new(config.bus.ring_buffer));
    let breaker = Arc::new(CircuitBreaker::new(Arc::clone(&bus)));

    let recorder = Arc::new(Recorder::new(
        &config.storage.path,
        &config.storage.filename,
        config.storage.privacy_mode,
    )?);
    recorder.attach(&bus);

    let mut registry = Registry::default();
    let metrics = TripwireMetrics::new(&mut registry);
    let observer = metrics.clone();
    bus.subscribe(move |event| observer.observe(event));

    let analyzer = Arc::new(Analyzer::new(
        Arc::clone(&bus),
        Arc::clone(&breaker),
        config.analyzer_config()?,
    ));
    analyzer.start();

    let upstream_url = upstream_url
        .or_else(|| config.providers.first().map(|p| p.base_url.clone()))
        .unwrap_or_else(|| DEFAULT_UPSTREAM.to_string());

    Ok(Arc::new(AppState {
        bus,
        breaker,
        analyzer,
        recorder,
        metrics,
        registry: Arc::new(registry),
        upstream: reqwest::Client::new(),
        upstream_url,
    }))
}

/// The full route table.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(admin::root))
        .route("/health", get(admin::health))
        .route("/metrics", get(admin::metrics))
        .route("/events", get(events::events))
        .route("/control", post(control::control))
        .route("/dev/emit", post(control::dev_emit))
        .route("/evidence", get(evidence::evidence_packet))
        .route("/evidence/export", get(evidence::evidence_export))
        .route("/v1/chat/completions", post(proxy_service::chat_completions))
        .with_state(state)
}
