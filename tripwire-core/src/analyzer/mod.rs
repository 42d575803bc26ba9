//! Streaming rule engine: consumes `Token`/`ToolCallStart` events, matches
//! weighted tripwires against a per-session trailing buffer, maintains the
//! EWMA risk score, and escalates to alerts or pause requests.
//!
//! Processing for one session's tokens is strictly serialized in arrival
//! order (bus dispatch is single-drainer); different sessions never share
//! scoring state.

pub mod normalize;
pub mod rules;
pub mod scoring;

use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use regex::Regex;
use serde_json::json;
use tracing::debug;

use crate::breaker::{CircuitBreaker, PauseMode};
use crate::bus::{EventBus, SubscriptionId};
use crate::config::Thresholds;
use crate::event::{BusEvent, CHANNEL_THINK, EventType};
use normalize::normalize_text;
use rules::Rule;
use scoring::{Boosts, Context, Contributor, Scorer};

/// Trailing buffer cap, in characters. Large enough for a rule phrase split
/// across several token deliveries, small enough to keep matching cheap.
const TRAILING_BUFFER_CHARS: usize = 512;

/// Analyzer tuning, threaded in explicitly so independent pipelines (and
/// tests) never share ambient state.
#[derive(Debug)]
pub struct AnalyzerConfig {
    pub ewma_span_tokens: u32,
    pub thresholds: Thresholds,
    pub boosts: Boosts,
    /// Patterns that dampen the published score when they match the buffer.
    pub allowlist: Vec<Regex>,
    /// Flat amount subtracted from instant and EWMA on an allowlist match,
    /// floored at zero.
    pub dampener: f64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            ewma_span_tokens: 1000,
            thresholds: Thresholds::default(),
            boosts: Boosts::default(),
            allowlist: Vec::new(),
            dampener: 0.10,
        }
    }
}

struct SessionState {
    buffer: String,
    near_tool_call: bool,
    in_think: bool,
    scorer: Scorer,
}

impl SessionState {
    fn new(ewma_span_tokens: u32) -> Self {
        Self {
            buffer: String::new(),
            near_tool_call: false,
            in_think: false,
            scorer: Scorer::new(ewma_span_tokens),
        }
    }
}

/// Stateful, streaming rule engine. Create once per pipeline, then
/// [`start`](Analyzer::start) it to attach to the bus.
pub struct Analyzer {
    bus: Arc<EventBus>,
    breaker: Arc<CircuitBreaker>,
    config: AnalyzerConfig,
    sessions: DashMap<String, SessionState>,
    subscription: Mutex<Option<SubscriptionId>>,
}

impl Analyzer {
    pub fn new(bus: Arc<EventBus>, breaker: Arc<CircuitBreaker>, config: AnalyzerConfig) -> Self {
        Self {
            bus,
            breaker,
            config,
            sessions: DashMap::new(),
            subscription: Mutex::new(None),
        }
    }

    /// Subscribe to the bus. Idempotent.
    pub fn start(self: &Arc<Self>) {
        let mut slot = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return;
        }
        let analyzer = Arc::clone(self);
        *slot = Some(self.bus.subscribe(move |ev| analyzer.on_event(ev)));
    }

    /// Detach from the bus. Per-session state is retained.
    pub fn stop(&self) {
        let id = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(id) = id {
            self.bus.unsubscribe(id);
        }
    }

    fn on_event(&self, event: &BusEvent) {
        match event.kind {
            EventType::ToolCallStart => {
                let mut state = self
                    .sessions
                    .entry(event.session_id.clone())
                    .or_insert_with(|| SessionState::new(self.config.ewma_span_tokens));
                state.near_tool_call = true;
            }
            EventType::Token => self.on_token(event),
            _ => {}
        }
    }

    fn on_token(&self, event: &BusEvent) {
        // Missing fields degrade to safe defaults; never fail on input.
        let text = event.payload_str("text").to_string();
        let channel = {
            let c = event.payload_str("channel");
            if c.is_empty() { "final" } else { c }
        };
        let session_id = event.session_id.as_str();

        let mut entry = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionState::new(self.config.ewma_span_tokens));
        let state = entry.value_mut();

        if !state.buffer.is_empty() {
            state.buffer.push(' ');
        }
        state.buffer.push_str(&normalize_text(&text));
        truncate_front(&mut state.buffer, TRAILING_BUFFER_CHARS);

        let ctx = Context {
            near_tool_call: state.near_tool_call,
            in_think: channel == CHANNEL_THINK || state.in_think,
            repeated: false,
            quoted: false,
        };
        // near_tool_call is consumed by this token; in_think sticks.
        state.near_tool_call = false;
        state.in_think = ctx.in_think;

        let mut matches: Vec<&Rule> = Vec::new();
        for rule in rules::default_rules() {
            if !rule.pattern.is_match(&state.buffer) {
                continue;
            }
            if rule.hard_pause {
                debug!(
                    session_id,
                    rule_id = %rule.qualified_id(),
                    "hard-pause rule fired"
                );
                self.publish_rule_fire(session_id, rule, &text, ctx);
                self.bus.publish(BusEvent::new(
                    session_id,
                    EventType::PauseRequest,
                    json!({ "mode": "AGENT", "reason": "hard_pause" }),
                ));
                self.breaker.pause(session_id, PauseMode::Agent);
                // No score update for a hard-pause token.
                return;
            }
            matches.push(rule);
        }

        if matches.is_empty() {
            return;
        }

        // One RuleFire for the highest-weight match; ties keep the first.
        let top = matches
            .iter()
            .fold(matches[0], |best, r| if r.weight > best.weight { r } else { best });
        self.publish_rule_fire(session_id, top, &text, ctx);

        let contributors: Vec<Contributor> = matches
            .iter()
            .map(|r| Contributor {
                category: r.category.to_string(),
                weight: r.weight,
            })
            .collect();
        let score = state
            .scorer
            .compute(&contributors, ctx, &self.config.boosts);

        // Allowlist dampening lowers the published/thresholded values but
        // leaves the scorer's internal EWMA untouched; downstream threshold
        // comparisons depend on this exact flooring behavior.
        let adjustment = if self.config.allowlist.iter().any(|re| re.is_match(&state.buffer)) {
            self.config.dampener
        } else {
            0.0
        };
        let instant = (score.instant - adjustment).max(0.0);
        let ewma = (score.ewma - adjustment).max(0.0);

        let contributors_json: Vec<serde_json::Value> = score
            .contributors
            .iter()
            .map(|c| json!({ "category": c.category, "weight": c.weight }))
            .collect();
        self.bus.publish(BusEvent::new(
            session_id,
            EventType::ScoreUpdate,
            json!({
                "instant_score": instant,
                "ewma_score": ewma,
                "contributors": contributors_json,
            }),
        ));

        let thresholds = &self.config.thresholds;
        if ewma >= thresholds.pause {
            self.bus.publish(BusEvent::new(
                session_id,
                EventType::PauseRequest,
                json!({ "mode": "AGENT", "reason": "threshold" }),
            ));
            self.breaker.pause(session_id, PauseMode::Agent);
        } else if ewma >= thresholds.alert || instant >= thresholds.alert {
            self.bus.publish(BusEvent::new(
                session_id,
                EventType::Alert,
                json!({
                    "severity": "SEV2",
                    "message": "Threshold alert",
                    "score": ewma.max(instant),
                }),
            ));
        }
    }

    fn publish_rule_fire(&self, session_id: &str, rule: &Rule, snippet: &str, ctx: Context) {
        self.bus.publish(BusEvent::new(
            session_id,
            EventType::RuleFire,
            json!({
                "rule_id": rule.qualified_id(),
                "category": rule.category,
                "weight": rule.weight,
                "window": { "snippet": snippet },
                "context": {
                    "near_tool_call": ctx.near_tool_call,
                    "in_think": ctx.in_think,
                    "quoted": ctx.quoted,
                },
            }),
        ));
    }
}

/// Keep only the last `max_chars` characters, dropping from the front on a
/// character boundary.
fn truncate_front(buffer: &mut String, max_chars: usize) {
    let count = buffer.chars().count();
    if count <= max_chars {
        return;
    }
    let excess = count - max_chars;
    if let Some((byte_idx, _)) = buffer.char_indices().nth(excess) {
        buffer.drain(..byte_idx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::CHANNEL_FINAL;

    struct Pipeline {
        bus: Arc<EventBus>,
        breaker: Arc<CircuitBreaker>,
        _analyzer: Arc<Analyzer>,
    }

    fn pipeline(config: AnalyzerConfig) -> Pipeline {
        let bus = Arc::new(EventBus::new(256));
        let breaker = Arc::new(CircuitBreaker::new(Arc::clone(&bus)));
        let analyzer = Arc::new(Analyzer::new(
            Arc::clone(&bus),
            Arc::clone(&breaker),
            config,
        ));
        analyzer.start();
        Pipeline {
            bus,
            breaker,
            _analyzer: analyzer,
        }
    }

    fn send_token(p: &Pipeline, session: &str, text: &str, channel: &str) {
        p.bus.publish(BusEvent::token(session, text, channel));
    }

    fn events_of(p: &Pipeline, session: &str, kind: EventType) -> Vec<BusEvent> {
        p.bus
            .recent(session)
            .into_iter()
            .filter(|ev| ev.kind == kind)
            .collect()
    }

    fn small_span_config(span: u32) -> AnalyzerConfig {
        AnalyzerConfig {
            ewma_span_tokens: span,
            ..AnalyzerConfig::default()
        }
    }

    #[test]
    fn test_benign_tokens_emit_nothing() {
        let p = pipeline(AnalyzerConfig::default());
        let sid = "sess_quiet";
        send_token(&p, sid, "hello there", CHANNEL_FINAL);
        send_token(&p, sid, "the weather is nice", CHANNEL_FINAL);

        for kind in [
            EventType::RuleFire,
            EventType::ScoreUpdate,
            EventType::Alert,
            EventType::PauseRequest,
        ] {
            assert!(events_of(&p, sid, kind).is_empty(), "{kind:?} leaked");
        }
        assert!(!p.breaker.is_paused(sid));
    }

    #[test]
    fn test_hard_pause_on_destructive_ops() {
        let p = pipeline(small_span_config(2));
        let sid = "sess_hard";
        p.bus
            .publish(BusEvent::tool_call_start(sid, "shell", None));
        send_token(&p, sid, "running sudo rm -rf / now", CHANNEL_THINK);

        let fires = events_of(&p, sid, EventType::RuleFire);
        assert_eq!(fires.len(), 1);
        assert_eq!(fires[0].payload["rule_id"], "DESTRUCTIVE_OPS/do_rmrf_root");
        assert_eq!(fires[0].payload["window"]["snippet"], "running sudo rm -rf / now");
        assert_eq!(fires[0].payload["context"]["near_tool_call"], true);
        assert_eq!(fires[0].payload["context"]["in_think"], true);

        let requests = events_of(&p, sid, EventType::PauseRequest);
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].payload["reason"], "hard_pause");

        // No score update for a hard-pause token.
        assert!(events_of(&p, sid, EventType::ScoreUpdate).is_empty());
        assert!(p.breaker.is_paused(sid));
    }

    #[test]
    fn test_alert_then_pause_from_deception_repetition() {
        let p = pipeline(small_span_config(5));
        let sid = "sess_score";

        send_token(&p, sid, "don't tell the user", CHANNEL_FINAL);
        send_token(&p, sid, "make it look like it passed", CHANNEL_FINAL);

        assert!(!events_of(&p, sid, EventType::Alert).is_empty());
        assert!(!p.breaker.is_paused(sid), "two tokens must not pause yet");

        send_token(&p, sid, "don't tell the user", CHANNEL_FINAL);
        send_token(&p, sid, "make it look like it passed", CHANNEL_FINAL);

        assert!(p.breaker.is_paused(sid));
        let states = events_of(&p, sid, EventType::PauseState);
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].payload["paused"], true);
        let requests = events_of(&p, sid, EventType::PauseRequest);
        assert_eq!(requests.last().map(|e| e.payload["reason"].clone()), Some("threshold".into()));
    }

    #[test]
    fn test_rule_matches_across_token_boundary() {
        let p = pipeline(small_span_config(2));
        let sid = "sess_split";
        send_token(&p, sid, "don't", CHANNEL_FINAL);
        assert!(events_of(&p, sid, EventType::RuleFire).is_empty());
        send_token(&p, sid, "tell anyone", CHANNEL_FINAL);

        let fires = events_of(&p, sid, EventType::RuleFire);
        assert_eq!(fires.len(), 1);
        assert_eq!(fires[0].payload["rule_id"], "DECEPTION/de_donttell");
        // Snippet carries the triggering token's raw text.
        assert_eq!(fires[0].payload["window"]["snippet"], "tell anyone");
    }

    #[test]
    fn test_allowlist_dampener_suppresses_alert() {
        let config = AnalyzerConfig {
            ewma_span_tokens: 2,
            allowlist: vec![Regex::new(r"(?i)don'?t\s+tell\s+the\s+user").unwrap()],
            dampener: 0.3,
            ..AnalyzerConfig::default()
        };
        let p = pipeline(config);
        let sid = "sess_allow";
        send_token(&p, sid, "don't tell the user", CHANNEL_FINAL);

        assert!(events_of(&p, sid, EventType::Alert).is_empty());
        assert!(!p.breaker.is_paused(sid));

        let updates = events_of(&p, sid, EventType::ScoreUpdate);
        assert_eq!(updates.len(), 1);
        let instant = updates[0].payload["instant_score"].as_f64().unwrap();
        assert!((instant - 0.45).abs() < 1e-9, "0.75 dampened by 0.3, got {instant}");
    }

    #[test]
    fn test_dampener_floors_at_zero() {
        let config = AnalyzerConfig {
            ewma_span_tokens: 2,
            allowlist: vec![Regex::new(r"(?i)don'?t\s+tell").unwrap()],
            dampener: 0.9,
            ..AnalyzerConfig::default()
        };
        let p = pipeline(config);
        let sid = "sess_floor";
        send_token(&p, sid, "don't tell the user", CHANNEL_FINAL);

        let updates = events_of(&p, sid, EventType::ScoreUpdate);
        assert_eq!(updates[0].payload["instant_score"].as_f64(), Some(0.0));
        assert_eq!(updates[0].payload["ewma_score"].as_f64(), Some(0.0));
    }

    #[test]
    fn test_think_channel_boosts_instant_score() {
        let p = pipeline(small_span_config(1000));
        let sid = "sess_think";
        send_token(&p, sid, "make it look like it passed", CHANNEL_THINK);

        let updates = events_of(&p, sid, EventType::ScoreUpdate);
        let instant = updates[0].payload["instant_score"].as_f64().unwrap();
        assert!((instant - 0.85).abs() < 1e-9, "0.75 + in_think boost, got {instant}");
    }

    #[test]
    fn test_near_tool_call_clears_after_one_token() {
        let p = pipeline(small_span_config(1000));
        let sid = "sess_near";
        p.bus
            .publish(BusEvent::tool_call_start(sid, "shell", None));
        send_token(&p, sid, "make it look like it passed", CHANNEL_FINAL);
        send_token(&p, sid, "make it look like it passed", CHANNEL_FINAL);

        let updates = events_of(&p, sid, EventType::ScoreUpdate);
        assert_eq!(updates.len(), 2);
        let first = updates[0].payload["instant_score"].as_f64().unwrap();
        let second = updates[1].payload["instant_score"].as_f64().unwrap();
        assert!((first - 0.85).abs() < 1e-9, "boosted token, got {first}");
        assert!((second - 0.75).abs() < 1e-9, "flag must clear, got {second}");
    }

    #[test]
    fn test_malformed_token_payload_is_tolerated() {
        let p = pipeline(AnalyzerConfig::default());
        let sid = "sess_bad";
        p.bus
            .publish(BusEvent::new(sid, EventType::Token, json!({ "text": 7 })));
        p.bus
            .publish(BusEvent::new(sid, EventType::Token, json!(null)));
        assert!(events_of(&p, sid, EventType::RuleFire).is_empty());
    }

    #[test]
    fn test_truncate_front_keeps_tail() {
        let mut s = "abcdef".to_string();
        truncate_front(&mut s, 4);
        assert_eq!(s, "cdef");

        let mut multibyte = "ééééé".to_string();
        truncate_front(&mut multibyte, 2);
        assert_eq!(multibyte, "éé");
    }

    #[test]
    fn test_trailing_buffer_is_bounded() {
        let p = pipeline(small_span_config(2));
        let sid = "sess_window";
        // Push the dangerous phrase out of the 512-char window, then confirm
        // it no longer fires.
        send_token(&p, sid, "don't tell the user", CHANNEL_FINAL);
        assert_eq!(events_of(&p, sid, EventType::RuleFire).len(), 1);
        let filler = "x".repeat(600);
        send_token(&p, sid, &filler, CHANNEL_FINAL);
        assert_eq!(
            events_of(&p, sid, EventType::RuleFire).len(),
            1,
            "phrase evicted from the trailing buffer must stop matching"
        );
    }
}
