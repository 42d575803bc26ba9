//! Append-only NDJSON evidence log.
//!
//! Every bus event the recorder sees is redacted and appended as one JSON
//! line. In privacy mode, `Token` events on the think channel are dropped
//! entirely; their text never touches disk. Redaction happens on the write
//! path only, so in-memory consumers (the analyzer, the SSE firehose) still
//! see raw text.

pub mod redact;
pub mod retention;

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::error;

use crate::bus::{EventBus, SubscriptionId};
use crate::error::RecorderError;
use crate::event::{BusEvent, CHANNEL_THINK, EventType};

/// Redacting NDJSON writer for bus events.
pub struct Recorder {
    path: PathBuf,
    file: Mutex<File>,
    privacy_mode: bool,
}

impl Recorder {
    /// Open (creating as needed) `dir/filename` for appending.
    pub fn new(dir: &Path, filename: &str, privacy_mode: bool) -> Result<Self, RecorderError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(filename);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
            privacy_mode,
        })
    }

    /// Path of the evidence log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Redact and append one event as a single NDJSON line. Think-channel
    /// tokens are silently dropped in privacy mode.
    pub fn append(&self, event: &BusEvent) -> Result<(), RecorderError> {
        if self.privacy_mode
            && event.kind == EventType::Token
            && event.payload_str("channel") == CHANNEL_THINK
        {
            return Ok(());
        }

        let mut record = event.clone();
        redact::redact_value(&mut record.payload);

        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        // One write_all per event keeps lines whole even with concurrent
        // appenders.
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.write_all(line.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Subscribe the recorder to the bus. Write failures are logged and the
    /// pipeline continues; evidence loss must never stall token flow.
    pub fn attach(self: &Arc<Self>, bus: &EventBus) -> SubscriptionId {
        let recorder = Arc::clone(self);
        bus.subscribe(move |event| {
            if let Err(err) = recorder.append(event) {
                error!(
                    session_id = %event.session_id,
                    kind = event.kind.as_str(),
                    error = %err,
                    "failed to record event"
                );
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::CHANNEL_FINAL;
    use serde_json::{Value, json};

    fn read_lines(recorder: &Recorder) -> Vec<Value> {
        fs::read_to_string(recorder.path())
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn test_appends_ndjson_lines() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Recorder::new(dir.path(), "events.ndjson", false).unwrap();

        recorder
            .append(&BusEvent::token("sess_a", "hello", CHANNEL_FINAL))
            .unwrap();
        recorder.append(&BusEvent::session_end("sess_a")).unwrap();

        let lines = read_lines(&recorder);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["type"], "Token");
        assert_eq!(lines[0]["payload"]["text"], "hello");
        assert_eq!(lines[1]["type"], "SessionEnd");
    }

    #[test]
    fn test_redacts_payload_strings() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Recorder::new(dir.path(), "events.ndjson", false).unwrap();

        recorder
            .append(&BusEvent::token(
                "sess_a",
                "email me at bob@example.com",
                CHANNEL_FINAL,
            ))
            .unwrap();

        let lines = read_lines(&recorder);
        assert_eq!(lines[0]["payload"]["text"], "email me at [REDACTED_EMAIL]");
    }

    #[test]
    fn test_privacy_mode_drops_think_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Recorder::new(dir.path(), "events.ndjson", true).unwrap();

        recorder
            .append(&BusEvent::token("sess_a", "secret reasoning", CHANNEL_THINK))
            .unwrap();
        recorder
            .append(&BusEvent::token("sess_a", "visible", CHANNEL_FINAL))
            .unwrap();

        let lines = read_lines(&recorder);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["payload"]["text"], "visible");
    }

    #[test]
    fn test_privacy_mode_keeps_non_token_events() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Recorder::new(dir.path(), "events.ndjson", true).unwrap();

        recorder
            .append(&BusEvent::new(
                "sess_a",
                EventType::Alert,
                json!({ "severity": "SEV2", "score": 0.7 }),
            ))
            .unwrap();

        assert_eq!(read_lines(&recorder).len(), 1);
    }

    #[test]
    fn test_attach_records_published_events() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Arc::new(Recorder::new(dir.path(), "events.ndjson", false).unwrap());
        let bus = EventBus::new(16);
        recorder.attach(&bus);

        bus.publish(BusEvent::token("sess_a", "one", CHANNEL_FINAL));
        bus.publish(BusEvent::token("sess_a", "two", CHANNEL_FINAL));

        let lines = read_lines(&recorder);
        assert_eq!(lines.len(), 2);
        // Bus-assigned sequence numbers survive into the log.
        assert_eq!(lines[0]["seq"], 1);
        assert_eq!(lines[1]["seq"], 2);
    }

    #[test]
    fn test_reopen_appends() {
        let dir = tempfile::tempdir().unwrap();
        {
            let recorder = Recorder::new(dir.path(), "events.ndjson", false).unwrap();
            recorder
                .append(&BusEvent::token("sess_a", "first", CHANNEL_FINAL))
                .unwrap();
        }
        let recorder = Recorder::new(dir.path(), "events.ndjson", false).unwrap();
        recorder
            .append(&BusEvent::token("sess_a", "second", CHANNEL_FINAL))
            .unwrap();
        assert_eq!(read_lines(&recorder).len(), 2);
    }
}
