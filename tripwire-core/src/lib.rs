//! Core pipeline for the tripwire safety proxy: event bus, streaming rule
//! analyzer, circuit breaker, and redacting evidence recorder.
//!
//! The crate is transport-free. Components communicate only through
//! [`bus::EventBus`]; the proxy crate wires HTTP traffic into `Token` events
//! and reads pause state back out of the [`breaker::CircuitBreaker`].
//!
//! Wiring order matters: the recorder must subscribe before the analyzer so
//! a hard-pause token is on disk before its containment side effects.

pub mod analyzer;
pub mod breaker;
pub mod bus;
pub mod config;
pub mod error;
pub mod event;
pub mod recorder;
pub mod session;

pub use analyzer::{Analyzer, AnalyzerConfig};
pub use breaker::{CircuitBreaker, PauseMode};
pub use bus::{EventBus, SubscriptionGuard, SubscriptionId};
pub use config::TripwireConfig;
pub use error::{ConfigError, RecorderError};
pub use event::{BusEvent, CHANNEL_FINAL, CHANNEL_THINK, EventType};
pub use recorder::Recorder;
pub use session::derive_session_id;
