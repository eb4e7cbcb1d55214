//! 📦 Common data structures — the building blocks of twinsink
//!
//! 🎬 INT. MESSAGE BUS — 3:47 AM
//!
//! A message arrives. It is small. It is structured. It has no idea it is about
//! to be photocopied and sent down two different pipes so that two write APIs can
//! race each other for bragging rights. Nobody asked the message. Nobody ever does.
//!
//! 🦆
//!
//! This module holds the humble types that every other module passes around:
//! the [`Message`], the [`Batch`] snapshot, the [`StrategyId`] name tag, and the
//! [`WriteOutcome`] report card a strategy hands back after one network call.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 🎯 One inbound message, produced upstream, read-only in here.
///
/// Fields that the producer may legitimately omit are `Option`. `payload` is an
/// `Option` too, but a missing payload is a conversion error at flush time, not a
/// deserialization error at intake. Intake never fails. That's the deal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Message {
    /// 🪪 Identifier. Becomes the row's `insertId` on the row-insert path.
    #[serde(default)]
    pub id: String,
    /// 📦 The actual content. Called `message` on the wire because that's what
    /// the producers call it and we are not here to start fights.
    #[serde(default, rename = "message", alias = "payload")]
    pub payload: Option<String>,
    /// ⏰ When the producer says it happened. Absent → stamped at conversion.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// 🏷️ Where it came from.
    #[serde(default)]
    pub source: Option<String>,
    /// 🔢 Priority. Absent → 0.
    #[serde(default)]
    pub priority: Option<i64>,
}

impl Message {
    /// 🏗️ Convenience constructor for the fully-populated case (tests, synthetic load).
    pub fn new(
        id: impl Into<String>,
        payload: impl Into<String>,
        source: impl Into<String>,
        priority: i64,
    ) -> Self {
        Self {
            id: id.into(),
            payload: Some(payload.into()),
            timestamp: Some(Utc::now()),
            source: Some(source.into()),
            priority: Some(priority),
        }
    }
}

/// 🎭 Which write path are we talking about?
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StrategyId {
    /// 📨 Bulk row insert with per-row error reporting.
    RowInsert,
    /// 🌊 Whole-batch streamed append with an offset on success.
    StreamingAppend,
}

impl StrategyId {
    pub const ALL: [StrategyId; 2] = [StrategyId::RowInsert, StrategyId::StreamingAppend];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyId::RowInsert => "row-insert",
            StrategyId::StreamingAppend => "streaming-append",
        }
    }
}

impl fmt::Display for StrategyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 📸 An immutable snapshot of a pending buffer, taken at flush time.
///
/// Consumed exactly once by one retry-executor run. The messages are `Arc`ed
/// because the same message sits in both lanes and cloning strings twice
/// to satisfy a benchmark would be ironic.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub messages: Vec<Arc<Message>>,
}

impl Batch {
    pub fn new(messages: Vec<Arc<Message>>) -> Self {
        Self { messages }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// 💀 One thing the sink said went wrong with one item (or with the whole call).
///
/// `reason` is the machine-ish code (`backendError`, `UNAVAILABLE`, ...) and
/// `message` is the human-ish prose. The retry classifier reads both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkFailure {
    pub reason: String,
    pub message: String,
}

impl SinkFailure {
    pub fn new(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for SinkFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.reason, self.message)
    }
}

/// 📋 The report card of one `write` call.
///
/// Indices are positions in the slice that was handed to `write`, not in the
/// original batch. The retry executor does the bookkeeping to map them back.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteOutcome {
    /// 📦 How many messages were handed to `write`.
    pub attempted: usize,
    /// ✅ How many made it.
    pub succeeded: usize,
    /// 💀 How many did not (`failures.len() + rejected.len()`).
    pub failed: usize,
    /// 🔄 Sink-side failures, keyed by index. Classified later as retriable or fatal.
    pub failures: BTreeMap<usize, SinkFailure>,
    /// 🚫 Conversion errors, keyed by index. Never sent, never retried.
    pub rejected: BTreeMap<usize, String>,
    /// 🌊 Stream offset reported by a successful append, if the path has one.
    pub offset: Option<i64>,
}

impl WriteOutcome {
    /// 🧮 Recompute `succeeded`/`failed` from the maps. Call after filling them in.
    pub(crate) fn tally(mut self) -> Self {
        self.failed = self.failures.len() + self.rejected.len();
        self.succeeded = self.attempted.saturating_sub(self.failed);
        self
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_a_message_parses_with_half_its_fields_missing() {
        let raw = r#"{"id":"m-1","message":"hello","priority":2,"mystery":"ignored"}"#;
        let message: Message =
            serde_json::from_str(raw).expect("💀 a sparse message should still parse");
        assert_eq!(message.id, "m-1");
        assert_eq!(message.payload.as_deref(), Some("hello"));
        assert_eq!(message.priority, Some(2));
        assert!(message.timestamp.is_none());
        assert!(message.source.is_none());
    }

    #[test]
    fn the_one_where_payload_answers_to_its_old_name_too() {
        let message: Message = serde_json::from_str(r#"{"id":"m-2","payload":"hi"}"#)
            .expect("💀 alias should parse");
        assert_eq!(message.payload.as_deref(), Some("hi"));
    }

    #[test]
    fn the_one_where_tally_does_the_arithmetic_so_you_dont_have_to() {
        let mut outcome = WriteOutcome {
            attempted: 5,
            ..Default::default()
        };
        outcome
            .failures
            .insert(1, SinkFailure::new("backendError", "nope"));
        outcome.rejected.insert(3, "missing id".to_string());
        let outcome = outcome.tally();
        assert_eq!(outcome.failed, 2);
        assert_eq!(outcome.succeeded, 3);
        assert!(!outcome.is_success());
    }
}
