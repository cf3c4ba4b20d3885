//! Log capture for asserting on `tracing` output.
//!
//! [`CapturedLogs`] is a `tracing-subscriber` layer that records every event
//! with its level, rendered message and fields. Install it as the thread
//! default for the duration of a test:
//!
//! ```
//! use iam_events_testing::CapturedLogs;
//!
//! let logs = CapturedLogs::new();
//! let _guard = logs.install();
//!
//! tracing::error!(critical = true, "Handler timed out");
//!
//! assert_eq!(logs.critical().len(), 1);
//! assert_eq!(logs.containing("timed out").len(), 1);
//! ```
//!
//! `#[tokio::test]` runs on a current-thread runtime, so events from spawned
//! tasks are captured too.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::field::{Field, Visit};
use tracing::subscriber::DefaultGuard;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Registry;
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

/// One captured event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Severity
    pub level: Level,
    /// Module path of the call site
    pub target: String,
    /// Rendered message
    pub message: String,
    /// Structured fields, rendered as strings
    pub fields: BTreeMap<String, String>,
}

impl LogRecord {
    /// Field value, if present.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Whether this record was logged at critical severity.
    #[must_use]
    pub fn is_critical(&self) -> bool {
        self.level == Level::ERROR && self.field("critical") == Some("true")
    }
}

/// Shared buffer of captured events.
#[derive(Clone, Default)]
pub struct CapturedLogs {
    records: Arc<Mutex<Vec<LogRecord>>>,
}

impl CapturedLogs {
    /// Empty capture.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install as the default subscriber for the current thread.
    #[must_use = "logs are only captured while the guard is alive"]
    pub fn install(&self) -> DefaultGuard {
        tracing::subscriber::set_default(Registry::default().with(self.clone()))
    }

    /// All records, in emission order.
    #[must_use]
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().unwrap().clone()
    }

    /// Records at exactly `level`.
    #[must_use]
    pub fn at_level(&self, level: Level) -> Vec<LogRecord> {
        self.filter(|record| record.level == level)
    }

    /// `ERROR` records that are not critical.
    #[must_use]
    pub fn errors(&self) -> Vec<LogRecord> {
        self.filter(|record| record.level == Level::ERROR && !record.is_critical())
    }

    /// Critical records.
    #[must_use]
    pub fn critical(&self) -> Vec<LogRecord> {
        self.filter(LogRecord::is_critical)
    }

    /// Records whose message contains `text`.
    #[must_use]
    pub fn containing(&self, text: &str) -> Vec<LogRecord> {
        self.filter(|record| record.message.contains(text))
    }

    /// Forget everything captured so far.
    pub fn clear(&self) {
        self.records.lock().unwrap().clear();
    }

    fn filter(&self, predicate: impl Fn(&LogRecord) -> bool) -> Vec<LogRecord> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|record| predicate(record))
            .cloned()
            .collect()
    }
}

impl fmt::Debug for CapturedLogs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapturedLogs")
            .field("records", &self.records.lock().map(|r| r.len()).unwrap_or_default())
            .finish()
    }
}

impl<S: Subscriber> Layer<S> for CapturedLogs {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);
        let metadata = event.metadata();
        self.records.lock().unwrap().push(LogRecord {
            level: *metadata.level(),
            target: metadata.target().to_string(),
            message: visitor.message,
            fields: visitor.fields,
        });
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: String,
    fields: BTreeMap<String, String>,
}

impl FieldVisitor {
    fn insert(&mut self, field: &Field, value: String) {
        if field.name() == "message" {
            self.message = value;
        } else {
            self.fields.insert(field.name().to_string(), value);
        }
    }
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, value.to_string());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, value.to_string());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, value.to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.insert(field, format!("{value:?}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_message_level_and_fields() {
        let logs = CapturedLogs::new();
        let _guard = logs.install();

        tracing::info!(topic = "iam.person", partition = 3, "Consumed {}", "message");
        tracing::error!(critical = true, event_type = %"PersonDeleted", "timed out");
        tracing::error!(error = %"boom", "failed");

        let records = logs.records();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].message, "Consumed message");
        assert_eq!(records[0].field("topic"), Some("iam.person"));
        assert_eq!(records[0].field("partition"), Some("3"));
        assert_eq!(logs.critical().len(), 1);
        assert_eq!(logs.critical()[0].field("event_type"), Some("PersonDeleted"));
        assert_eq!(logs.errors().len(), 1);
        assert_eq!(logs.containing("failed").len(), 1);

        logs.clear();
        assert!(logs.records().is_empty());
    }
}
