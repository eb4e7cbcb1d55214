// ai
//! 🔄 Transforms — turning a [`Message`] into the row the warehouse actually wants.
//!
//! 🎬 COLD OPEN — INT. CUSTOMS DESK — 2:47 AM
//!
//! Every message gets its passport stamped here before boarding either flight.
//! One canonical flat schema, [`WarehouseRow`], for both write paths. There used to
//! be a nested variant with the same fields duplicated at two levels. It has been
//! asked to leave. It did not take it well.
//!
//! 🧠 Knowledge graph:
//! - `WarehouseRow`: the flat row (`id`, `message`, `timestamp`, `source`, `priority`, `insert_time`)
//! - `InsertRow`: row-insert wire shape, `{"insertId": ..., "json": {...}}`
//! - `ConversionError`: a message that cannot become a row. Permanent. Never retried.
//!
//! Defaults are deterministic given the conversion instant: absent priority → 0,
//! absent source → `"unknown"`, absent timestamp → conversion time.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::common::Message;

// -- 🏷️ what we call a message that didn't tell us where it came from
const UNKNOWN_SOURCE: &str = "unknown";

/// 📦 The one true row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseRow {
    pub id: String,
    pub message: String,
    /// RFC 3339, UTC, millisecond precision.
    pub timestamp: String,
    pub source: String,
    pub priority: i64,
    /// ⏰ Stamped when the row is built, so a retried row gets a fresh one.
    pub insert_time: String,
}

/// 📨 The row-insert API wants an envelope: a dedup id plus the row itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertRow {
    pub insert_id: String,
    pub json: WarehouseRow,
}

/// 🚫 A message that can't be turned into a row, no matter how many times we ask.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionError {
    #[error("message has an empty id")]
    MissingId,
    #[error("message '{0}' has no payload")]
    MissingPayload(String),
}

fn rfc3339(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// 🔄 Map one message onto the canonical row, stamping `now` where needed.
pub fn to_warehouse_row(
    message: &Message,
    now: DateTime<Utc>,
) -> Result<WarehouseRow, ConversionError> {
    if message.id.trim().is_empty() {
        return Err(ConversionError::MissingId);
    }
    let payload = message
        .payload
        .as_ref()
        .ok_or_else(|| ConversionError::MissingPayload(message.id.clone()))?;

    Ok(WarehouseRow {
        id: message.id.clone(),
        message: payload.clone(),
        timestamp: rfc3339(message.timestamp.unwrap_or(now)),
        source: message
            .source
            .clone()
            .unwrap_or_else(|| UNKNOWN_SOURCE.to_string()),
        priority: message.priority.unwrap_or(0),
        insert_time: rfc3339(now),
    })
}

/// 📨 Same thing, wrapped in the row-insert envelope.
pub fn to_insert_row(message: &Message, now: DateTime<Utc>) -> Result<InsertRow, ConversionError> {
    let json = to_warehouse_row(message, now)?;
    Ok(InsertRow {
        insert_id: json.id.clone(),
        json,
    })
}
