//! Per-session circuit breaker: pause state plus cancellation handles.
//!
//! Pausing a session is the containment action. It cancels the session's
//! current [`CancellationToken`] so any in-flight upstream call bound to it
//! fails fast, and it publishes a `PauseState` event for observers. Pause is
//! sticky: there is no timeout-based auto-unpause.
//!
//! Invariants:
//! - a session has at most one pause entry and one live cancellation handle;
//! - `pause` is idempotent — a second call while paused neither re-cancels
//!   nor re-publishes;
//! - a cancelled token is never reused: `unpause` installs a fresh handle so
//!   subsequent calls are not born already-cancelled.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::bus::EventBus;
use crate::event::{BusEvent, EventType};

/// What a pause restricts. Carried in `PauseRequest`/`PauseState` payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PauseMode {
    #[serde(rename = "AGENT")]
    Agent,
    #[serde(rename = "TOOL")]
    Tool,
    #[serde(rename = "IO")]
    Io,
}

impl PauseMode {
    /// Wire name (`AGENT`, `TOOL`, `IO`).
    pub fn as_str(&self) -> &'static str {
        match self {
            PauseMode::Agent => "AGENT",
            PauseMode::Tool => "TOOL",
            PauseMode::Io => "IO",
        }
    }
}

#[derive(Default)]
struct BreakerInner {
    paused: HashMap<String, PauseMode>,
    handles: HashMap<String, CancellationToken>,
}

/// Shared pause/cancellation state, keyed by session id.
pub struct CircuitBreaker {
    bus: Arc<EventBus>,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            inner: Mutex::new(BreakerInner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the session is currently paused.
    pub fn is_paused(&self, session_id: &str) -> bool {
        self.lock().paused.contains_key(session_id)
    }

    /// The pause mode for a paused session, if any.
    pub fn pause_mode(&self, session_id: &str) -> Option<PauseMode> {
        self.lock().paused.get(session_id).copied()
    }

    /// The session's current cancellation handle, created lazily on first
    /// access. Streaming consumers must select on this token each read so a
    /// pause terminates their loop within one chunk interval.
    pub fn cancellation(&self, session_id: &str) -> CancellationToken {
        self.lock()
            .handles
            .entry(session_id.to_string())
            .or_default()
            .clone()
    }

    /// Pause the session: record the mode, cancel the session's current
    /// handle (if one was ever issued), and publish `PauseState{paused:true}`.
    /// Returns `false` without side effects when already paused.
    pub fn pause(&self, session_id: &str, mode: PauseMode) -> bool {
        let handle = {
            let mut inner = self.lock();
            if inner.paused.contains_key(session_id) {
                return false;
            }
            inner.paused.insert(session_id.to_string(), mode);
            inner.handles.get(session_id).cloned()
        };

        if let Some(token) = handle {
            token.cancel();
        }
        warn!(session_id, mode = mode.as_str(), "session paused");
        self.bus.publish(BusEvent::new(
            session_id,
            EventType::PauseState,
            json!({ "paused": true, "mode": mode.as_str() }),
        ));
        true
    }

    /// Unpause the session: clear the pause entry, install a fresh
    /// cancellation handle, and publish `PauseState{paused:false}`. Returns
    /// `false` without side effects when the session was not paused.
    pub fn unpause(&self, session_id: &str) -> bool {
        {
            let mut inner = self.lock();
            if inner.paused.remove(session_id).is_none() {
                return false;
            }
            inner
                .handles
                .insert(session_id.to_string(), CancellationToken::new());
        }

        debug!(session_id, "session unpaused");
        self.bus.publish(BusEvent::new(
            session_id,
            EventType::PauseState,
            json!({ "paused": false }),
        ));
        true
    }
}
