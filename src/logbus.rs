//! Log Bus: bounded in-memory ring of structured records with live fan-out
//!
//! Components publish structured records; the bus keeps the most recent N
//! in a ring and broadcasts every record to connected subscribers. Publish
//! never blocks and never awaits: slow subscribers lag on their broadcast
//! receiver and are dropped by the stream layer rather than back-pressuring
//! publishers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use utoipa::ToSchema;

/// Severity level of a log record
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Diagnostic detail
    Debug,
    /// Routine activity
    Info,
    /// A pipeline step finished successfully
    Success,
    /// Something unusual that did not fail the operation
    Warning,
    /// An operation failed
    Error,
}

/// One structured log record
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct LogRecord {
    /// Monotonically increasing record id (strictly increasing per bus)
    pub id: u64,

    /// UTC timestamp at publish time
    pub timestamp: DateTime<Utc>,

    /// Severity level
    pub level: LogLevel,

    /// Symbolic component tag (e.g. "orchestrator", "steamcmd")
    pub source: String,

    /// Human-readable message
    pub message: String,

    /// Arbitrary structured payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

struct Ring {
    records: VecDeque<LogRecord>,
    capacity: usize,
}

/// The process-wide log bus (cheap to clone; all state is shared)
#[derive(Clone)]
pub struct LogBus {
    ring: Arc<Mutex<Ring>>,
    tx: tokio::sync::broadcast::Sender<LogRecord>,
    next_id: Arc<AtomicU64>,
}

impl LogBus {
    /// Create a bus retaining at most `capacity` records.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = tokio::sync::broadcast::channel(capacity.max(16));
        Self {
            ring: Arc::new(Mutex::new(Ring {
                records: VecDeque::with_capacity(capacity),
                capacity,
            })),
            tx,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Publish a record. Non-blocking; on ring overflow the oldest record
    /// is discarded. Records are also mirrored to `tracing` so the bus and
    /// the diagnostic logger stay consistent.
    pub fn publish(
        &self,
        level: LogLevel,
        source: &str,
        message: impl Into<String>,
        data: Option<serde_json::Value>,
    ) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let record = LogRecord {
            id,
            timestamp: Utc::now(),
            level,
            source: source.to_string(),
            message: message.into(),
            data,
        };

        match level {
            LogLevel::Debug => tracing::debug!(source, record_id = id, "{}", record.message),
            LogLevel::Info | LogLevel::Success => {
                tracing::info!(source, record_id = id, "{}", record.message)
            }
            LogLevel::Warning => tracing::warn!(source, record_id = id, "{}", record.message),
            LogLevel::Error => tracing::error!(source, record_id = id, "{}", record.message),
        }

        if let Ok(mut ring) = self.ring.lock() {
            if ring.records.len() == ring.capacity {
                ring.records.pop_front();
            }
            ring.records.push_back(record.clone());
        }

        // send() fails only when no subscriber is connected, which is fine
        self.tx.send(record).ok();
        id
    }

    /// Publish an info-level record.
    pub fn info(&self, source: &str, message: impl Into<String>) -> u64 {
        self.publish(LogLevel::Info, source, message, None)
    }

    /// Publish a success-level record.
    pub fn success(&self, source: &str, message: impl Into<String>) -> u64 {
        self.publish(LogLevel::Success, source, message, None)
    }

    /// Publish a warning-level record.
    pub fn warn(&self, source: &str, message: impl Into<String>) -> u64 {
        self.publish(LogLevel::Warning, source, message, None)
    }

    /// Publish an error-level record.
    pub fn error(&self, source: &str, message: impl Into<String>) -> u64 {
        self.publish(LogLevel::Error, source, message, None)
    }

    /// The most recent `count` records, oldest first.
    pub fn recent(&self, count: usize) -> Vec<LogRecord> {
        match self.ring.lock() {
            Ok(ring) => {
                let skip = ring.records.len().saturating_sub(count);
                ring.records.iter().skip(skip).cloned().collect()
            }
            Err(_) => Vec::new(),
        }
    }

    /// Subscribe to live records. Each subscriber receives every record
    /// published after the call, in publish order.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<LogRecord> {
        self.tx.subscribe()
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_strictly_increasing() {
        let bus = LogBus::new(10);
        let a = bus.info("test", "one");
        let b = bus.info("test", "two");
        let c = bus.error("test", "three");
        assert!(a < b && b < c);
    }

    #[test]
    fn ring_discards_oldest_on_overflow() {
        let bus = LogBus::new(3);
        for i in 0..5 {
            bus.info("test", format!("msg {i}"));
        }
        let recent = bus.recent(10);
        assert_eq!(recent.len(), 3, "ring must hold at most its capacity");
        assert_eq!(recent[0].message, "msg 2");
        assert_eq!(recent[2].message, "msg 4");
    }

    #[test]
    fn recent_returns_oldest_first() {
        let bus = LogBus::new(10);
        bus.info("test", "first");
        bus.info("test", "second");
        let recent = bus.recent(2);
        assert_eq!(recent[0].message, "first");
        assert_eq!(recent[1].message, "second");
    }

    #[test]
    fn recent_with_small_count_takes_the_tail() {
        let bus = LogBus::new(10);
        for i in 0..6 {
            bus.info("test", format!("msg {i}"));
        }
        let recent = bus.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].message, "msg 4");
        assert_eq!(recent[1].message, "msg 5");
    }

    #[tokio::test]
    async fn subscribers_receive_records_in_publish_order() {
        let bus = LogBus::new(10);
        let mut rx = bus.subscribe();

        bus.info("test", "a");
        bus.warn("test", "b");

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.message, "a");
        assert_eq!(second.message, "b");
        assert!(first.id < second.id);
    }

    #[tokio::test]
    async fn multiple_subscribers_each_receive_every_record() {
        let bus = LogBus::new(10);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.info("test", "shared");

        assert_eq!(rx1.recv().await.unwrap().message, "shared");
        assert_eq!(rx2.recv().await.unwrap().message, "shared");
    }

    #[test]
    fn publish_without_subscribers_does_not_fail() {
        let bus = LogBus::new(4);
        // No receiver connected; the send error must be swallowed
        bus.publish(
            LogLevel::Debug,
            "test",
            "nobody listening",
            Some(serde_json::json!({"k": 1})),
        );
        assert_eq!(bus.recent(1).len(), 1);
    }

    #[test]
    fn record_serializes_with_lowercase_level() {
        let bus = LogBus::new(2);
        bus.success("orchestrator", "done");
        let rec = &bus.recent(1)[0];
        let json = serde_json::to_value(rec).unwrap();
        assert_eq!(json["level"], "success");
        assert_eq!(json["source"], "orchestrator");
        assert!(json.get("data").is_none(), "absent data must be omitted");
    }
}
