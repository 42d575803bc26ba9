//! Prometheus metrics for the proxy, exported at `/metrics` in OpenMetrics
//! text format via `prometheus-client`.

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;

use tripwire_core::event::{BusEvent, EventType};

/// Labels for the per-type event counter.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct EventLabels {
    /// Bus event type (e.g. "Token", "RuleFire").
    pub event_type: String,
}

/// Labels for the rule-fire counter.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RuleLabels {
    /// Qualified rule id (e.g. "DESTRUCTIVE_OPS/do_rmrf_root").
    pub rule_id: String,
}

/// Labels for the pause-request counter.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct PauseLabels {
    /// Pause reason: "hard_pause" or "threshold".
    pub reason: String,
}

/// Labels for the stream-outcome counter.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct StreamLabels {
    /// How the upstream stream ended: "completed", "contained",
    /// "upstream_error", or "client_closed".
    pub outcome: String,
}

/// All proxy metrics. Bus-driven counters are fed by
/// [`observe`](TripwireMetrics::observe) from a bus subscription.
#[derive(Clone)]
pub struct TripwireMetrics {
    pub events: Family<EventLabels, Counter>,
    pub rule_fires: Family<RuleLabels, Counter>,
    pub pauses: Family<PauseLabels, Counter>,
    pub streams: Family<StreamLabels, Counter>,
}

impl TripwireMetrics {
    /// Create the metric families and register them.
    pub fn new(registry: &mut Registry) -> Self {
        let events = Family::<EventLabels, Counter>::default();
        registry.register(
            "tripwire_events",
            "Bus events published, by event type",
            events.clone(),
        );
        let rule_fires = Family::<RuleLabels, Counter>::default();
        registry.register(
            "tripwire_rule_fires",
            "Analyzer rule fires, by qualified rule id",
            rule_fires.clone(),
        );
        let pauses = Family::<PauseLabels, Counter>::default();
        registry.register(
            "tripwire_pauses",
            "Pause requests, by reason",
            pauses.clone(),
        );
        let streams = Family::<StreamLabels, Counter>::default();
        registry.register(
            "tripwire_streams",
            "Upstream streams, by outcome",
            streams.clone(),
        );
        Self {
            events,
            rule_fires,
            pauses,
            streams,
        }
    }

    /// Update bus-driven counters for one published event.
    pub fn observe(&self, event: &BusEvent) {
        self.events
            .get_or_create(&EventLabels {
                event_type: event.kind.as_str().to_string(),
            })
            .inc();
        match event.kind {
            EventType::RuleFire => {
                self.rule_fires
                    .get_or_create(&RuleLabels {
                        rule_id: event.payload_str("rule_id").to_string(),
                    })
                    .inc();
            }
            EventType::PauseRequest => {
                self.pauses
                    .get_or_create(&PauseLabels {
                        reason: event.payload_str("reason").to_string(),
                    })
                    .inc();
            }
            _ => {}
        }
    }

    /// Record how an upstream stream ended.
    pub fn record_stream_outcome(&self, outcome: &str) {
        self.streams
            .get_or_create(&StreamLabels {
                outcome: outcome.to_string(),
            })
            .inc();
    }
}
