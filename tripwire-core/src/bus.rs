//! Typed, ordered, per-session publish/subscribe log with bounded retention.
//!
//! The bus keeps a bounded ring buffer of recent events per session and
//! fans every published event out to all current subscribers. The source of
//! truth for ordering is the publish call order: events are delivered to
//! subscribers in exactly the order `publish` was called, which preserves
//! per-session ordering because each session's events originate from a single
//! connection task.
//!
//! # Dispatch model
//!
//! Subscriber callbacks run synchronously, but a callback may itself publish
//! (the analyzer publishes `RuleFire`/`ScoreUpdate` while handling a `Token`).
//! Nested publishes are appended to an internal queue and drained by the
//! outermost `publish` call on that thread, so dispatch is never re-entrant
//! and the bus mutex is never held while a callback runs.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::event::BusEvent;

type Subscriber = Arc<dyn Fn(&BusEvent) + Send + Sync>;

/// Handle returned by [`EventBus::subscribe`]; pass to
/// [`EventBus::unsubscribe`] to remove the callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

/// RAII subscription that unsubscribes on drop. Used by delivery paths whose
/// lifetime is tied to a client connection (the SSE firehose), where a
/// dangling subscriber would otherwise accumulate per disconnect.
pub struct SubscriptionGuard {
    bus: Arc<EventBus>,
    id: SubscriptionId,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.id);
    }
}

struct Inner {
    buffers: HashMap<String, VecDeque<BusEvent>>,
    subscribers: Vec<(u64, Subscriber)>,
    next_subscriber: u64,
    next_seq: u64,
    queue: VecDeque<BusEvent>,
    dispatching: bool,
}

/// Per-session event log and fan-out hub. Shared across connection tasks
/// behind an `Arc`; all state lives behind one coarse mutex.
pub struct EventBus {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl EventBus {
    /// Create a bus whose per-session ring buffers hold at most `capacity`
    /// events (clamped to at least 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner {
                buffers: HashMap::new(),
                subscribers: Vec::new(),
                next_subscriber: 0,
                next_seq: 0,
                queue: VecDeque::new(),
                dispatching: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned bus would be worse than a torn counter; recover the
        // guard rather than propagating the panic across every publisher.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append `event` to its session's ring buffer (evicting the oldest on
    /// overflow) and deliver it to every current subscriber. Returns the
    /// sequence number assigned to the event.
    ///
    /// If this thread is already inside a dispatch (a subscriber publishing),
    /// the event is queued and delivered by the outer call after the events
    /// ahead of it; the returned sequence number is still assigned here.
    pub fn publish(&self, mut event: BusEvent) -> u64 {
        let seq = {
            let mut inner = self.lock();
            inner.next_seq += 1;
            event.seq = inner.next_seq;

            let capacity = self.capacity;
            let buffer = inner.buffers.entry(event.session_id.clone()).or_default();
            buffer.push_back(event.clone());
            if buffer.len() > capacity {
                buffer.pop_front();
            }

            inner.queue.push_back(event);
            if inner.dispatching {
                return inner.next_seq;
            }
            inner.dispatching = true;
            inner.next_seq
        };

        loop {
            // Snapshot subscribers per event so that unsubscribing during a
            // dispatch never affects deliveries already in flight.
            let (next, subscribers) = {
                let mut inner = self.lock();
                match inner.queue.pop_front() {
                    Some(ev) => {
                        let subs: Vec<Subscriber> =
                            inner.subscribers.iter().map(|(_, s)| s.clone()).collect();
                        (ev, subs)
                    }
                    None => {
                        inner.dispatching = false;
                        return seq;
                    }
                }
            };
            for subscriber in &subscribers {
                subscriber(&next);
            }
        }
    }

    /// Register a callback invoked for every published event.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&BusEvent) + Send + Sync + 'static,
    {
        let mut inner = self.lock();
        inner.next_subscriber += 1;
        let id = inner.next_subscriber;
        inner.subscribers.push((id, Arc::new(callback)));
        SubscriptionId(id)
    }

    /// Register a callback and get a guard that unsubscribes on drop.
    pub fn subscribe_guarded<F>(self: &Arc<Self>, callback: F) -> SubscriptionGuard
    where
        F: Fn(&BusEvent) + Send + Sync + 'static,
    {
        SubscriptionGuard {
            bus: Arc::clone(self),
            id: self.subscribe(callback),
        }
    }

    /// Remove a previously registered callback. Unknown ids are a no-op.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut inner = self.lock();
        inner.subscribers.retain(|(sub_id, _)| *sub_id != id.0);
    }

    /// Snapshot of the session's buffered events, oldest first. Empty for an
    /// unknown session. Later publishes are not observable through the
    /// returned vector.
    pub fn recent(&self, session_id: &str) -> Vec<BusEvent> {
        let inner = self.lock();
        inner
            .buffers
            .get(session_id)
            .map(|buffer| buffer.iter().cloned().collect())
            .unwrap_or_default()
    }
}
