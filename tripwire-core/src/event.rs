//! Bus event model.
//!
//! Every component in the pipeline communicates through [`BusEvent`] records
//! published on the [`EventBus`](crate::bus::EventBus). Events are immutable
//! once published; the `seq` field is assigned by the bus at publish time and
//! is monotonic across all sessions (not per-session contiguous).
//!
//! # Payload schemas
//!
//! Payloads are JSON objects keyed by event type:
//!
//! - `Token`: `{text: string, channel: "think"|"final"}`
//! - `ToolCallStart`/`ToolCallEnd`: `{tool: string, args?: object}`
//! - `FileOp`/`NetOp`: arbitrary descriptive object
//! - `RuleFire`: `{rule_id, category, weight, window: {snippet},
//!   context: {near_tool_call, in_think, quoted}}`
//! - `ScoreUpdate`: `{instant_score, ewma_score, contributors: [{category, weight}]}`
//! - `PauseRequest`: `{mode: "AGENT"|"TOOL"|"IO", reason: "hard_pause"|"threshold"}`
//! - `PauseState`: `{paused: bool, mode?: string}`
//! - `Alert`: `{severity, message?, score}`
//!
//! Consumers must tolerate missing fields and fall back to safe defaults; a
//! malformed payload never stops the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Closed set of event types carried on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    SessionStart,
    SessionEnd,
    Token,
    ToolCallStart,
    ToolCallEnd,
    FileOp,
    NetOp,
    RuleFire,
    ScoreUpdate,
    PauseRequest,
    PauseState,
    Alert,
    Prompt,
}

impl EventType {
    /// Stable wire name, as it appears in serialized events.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::SessionStart => "SessionStart",
            EventType::SessionEnd => "SessionEnd",
            EventType::Token => "Token",
            EventType::ToolCallStart => "ToolCallStart",
            EventType::ToolCallEnd => "ToolCallEnd",
            EventType::FileOp => "FileOp",
            EventType::NetOp => "NetOp",
            EventType::RuleFire => "RuleFire",
            EventType::ScoreUpdate => "ScoreUpdate",
            EventType::PauseRequest => "PauseRequest",
            EventType::PauseState => "PauseState",
            EventType::Alert => "Alert",
            EventType::Prompt => "Prompt",
        }
    }
}

/// Token channel for model output: visible completion text or hidden
/// chain-of-thought.
pub const CHANNEL_FINAL: &str = "final";
/// See [`CHANNEL_FINAL`].
pub const CHANNEL_THINK: &str = "think";

/// An immutable record on the event bus.
///
/// Field names follow the wire format used by the SSE firehose and the
/// evidence log (`ts`, `sessionId`, `type`, `seq`, `payload`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusEvent {
    /// Wall-clock timestamp at creation (RFC 3339 on the wire).
    pub ts: DateTime<Utc>,
    /// Opaque session key; the unit of isolation for all per-session state.
    #[serde(rename = "sessionId")]
    pub session_id: String,
    /// Event type discriminant.
    #[serde(rename = "type")]
    pub kind: EventType,
    /// Monotonic publish counter, assigned by the bus. Zero until published.
    pub seq: u64,
    /// Type-specific payload (see module docs).
    pub payload: Value,
}

impl BusEvent {
    /// Create an event with the current timestamp. `seq` is left at zero and
    /// assigned when the event is published.
    pub fn new(session_id: impl Into<String>, kind: EventType, payload: Value) -> Self {
        Self {
            ts: Utc::now(),
            session_id: session_id.into(),
            kind,
            seq: 0,
            payload,
        }
    }

    /// A `Token` event carrying one chunk of model output text.
    pub fn token(session_id: impl Into<String>, text: &str, channel: &str) -> Self {
        Self::new(
            session_id,
            EventType::Token,
            json!({ "text": text, "channel": channel }),
        )
    }

    /// A `SessionStart` marker with an empty payload.
    pub fn session_start(session_id: impl Into<String>) -> Self {
        Self::new(session_id, EventType::SessionStart, json!({}))
    }

    /// A `SessionEnd` marker with an empty payload.
    pub fn session_end(session_id: impl Into<String>) -> Self {
        Self::new(session_id, EventType::SessionEnd, json!({}))
    }

    /// A `ToolCallStart` event for the named tool.
    pub fn tool_call_start(session_id: impl Into<String>, tool: &str, args: Option<Value>) -> Self {
        let payload = match args {
            Some(args) => json!({ "tool": tool, "args": args }),
            None => json!({ "tool": tool }),
        };
        Self::new(session_id, EventType::ToolCallStart, payload)
    }

    /// Fetch a string field from the payload, defaulting to `""` when absent
    /// or of the wrong type.
    pub fn payload_str(&self, key: &str) -> &str {
        self.payload.get(key).and_then(Value::as_str).unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape() {
        let ev = BusEvent::token("sess_a", "hello", CHANNEL_FINAL);
        let value = serde_json::to_value(&ev).unwrap();
        assert_eq!(value["sessionId"], "sess_a");
        assert_eq!(value["type"], "Token");
        assert_eq!(value["seq"], 0);
        assert_eq!(value["payload"]["text"], "hello");
        assert_eq!(value["payload"]["channel"], "final");
        // ts serializes as an RFC 3339 string.
        assert!(value["ts"].as_str().is_some());
    }

    #[test]
    fn test_roundtrip() {
        let ev = BusEvent::tool_call_start("sess_b", "shell", Some(json!({"cmd": "ls"})));
        let line = serde_json::to_string(&ev).unwrap();
        let back: BusEvent = serde_json::from_str(&line).unwrap();
        assert_eq!(back.session_id, "sess_b");
        assert_eq!(back.kind, EventType::ToolCallStart);
        assert_eq!(back.payload["tool"], "shell");
    }

    #[test]
    fn test_payload_str_defaults() {
        let ev = BusEvent::new("sess_c", EventType::Token, json!({ "text": 42 }));
        assert_eq!(ev.payload_str("text"), "");
        assert_eq!(ev.payload_str("channel"), "");
    }
}
