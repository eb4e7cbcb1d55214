//! 🔌 Backends — the sink clients, where the real I/O happens.
//!
//! 🚰 Two kinds of drain: a row-insert API that grades every row individually,
//! and a streaming-append API that grades the whole batch at once and hands back
//! an offset like a coat-check ticket.
//!
//! 🎭 Same casting-agency pattern as always: a trait per capability, concrete
//! clients, and an enum that dispatches so the strategies never need to know
//! whether they are talking to a warehouse, a test double, or the void.
//!
//! ⚠️ Clients are I/O only. No buffering, no retries, no conversion. They get
//! rows, they send rows, they report what the sink said. Retrying is somebody
//! else's job (see `retry`). Ancient proverb: "He who retries inside the client,
//! retries squared in production."
//!
//! 🦆

use std::error::Error as StdError;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::app_config::{AppendConfig, RowInsertConfig};
use crate::common::SinkFailure;
use crate::transforms::{InsertRow, WarehouseRow};

pub mod append_http;
pub mod bigquery;
pub mod common_config;
pub mod in_mem;

pub use append_http::{HttpAppendClient, HttpAppendConfig};
pub use bigquery::{BigQueryInsertClient, BigQueryInsertConfig};
pub use common_config::CommonSinkConfig;
pub use in_mem::{InMemoryAppendClient, InMemoryConfig, InMemoryRowInsertClient};

// ===== Errors and responses =====

/// 💀 Everything a sink call can go wrong with, in a shape the retry executor can read.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    /// The sink answered, and the answer was no.
    #[error("sink rejected the call with {status} ({reason}): {message}")]
    Api {
        status: u16,
        reason: String,
        message: String,
    },
    /// We never got a usable answer.
    #[error("transport failure ({reason}): {message}")]
    Transport { reason: String, message: String },
    /// We got an answer but couldn't read it.
    #[error("could not decode sink response: {0}")]
    Decode(String),
}

impl SinkError {
    pub fn api(status: u16, reason: impl Into<String>, message: impl Into<String>) -> Self {
        SinkError::Api {
            status,
            reason: reason.into(),
            message: message.into(),
        }
    }

    pub fn transport(reason: impl Into<String>, message: impl Into<String>) -> Self {
        SinkError::Transport {
            reason: reason.into(),
            message: message.into(),
        }
    }

    /// 🔄 Flatten into the reason + message pair the classifier understands.
    pub fn to_failure(&self) -> SinkFailure {
        match self {
            SinkError::Api {
                reason, message, ..
            } => SinkFailure::new(reason.clone(), message.clone()),
            SinkError::Transport { reason, message } => {
                SinkFailure::new(reason.clone(), message.clone())
            }
            SinkError::Decode(message) => SinkFailure::new("decode", message.clone()),
        }
    }
}

impl From<reqwest::Error> for SinkError {
    fn from(err: reqwest::Error) -> Self {
        // -- 🧅 reqwest's Display stops at the top layer; "connection reset" lives deeper
        let mut message = err.to_string();
        let mut cause = err.source();
        while let Some(inner) = cause {
            message.push_str(": ");
            message.push_str(&inner.to_string());
            cause = inner.source();
        }
        let reason = if err.is_timeout() {
            "timeout"
        } else if err.is_connect() {
            "unavailable"
        } else if err.is_decode() {
            return SinkError::Decode(message);
        } else {
            "transport"
        };
        SinkError::transport(reason, message)
    }
}

/// 📋 One error proto, as the warehouse spells it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ErrorProto {
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
}

/// 📋 The errors for one row, keyed by its position in the request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RowInsertError {
    pub index: usize,
    #[serde(default)]
    pub errors: Vec<ErrorProto>,
}

impl RowInsertError {
    /// 🎯 The first error is the one that matters; the rest are usually "stopped" echoes.
    pub fn to_failure(&self) -> SinkFailure {
        match self.errors.first() {
            Some(first) => SinkFailure::new(first.reason.clone(), first.message.clone()),
            None => SinkFailure::new("unknown", "row rejected without details"),
        }
    }
}

/// ✅ What a row-insert call returns when the call itself went through.
/// An empty `insert_errors` means every row landed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertResponse {
    #[serde(default)]
    pub insert_errors: Vec<RowInsertError>,
}

/// ✅ What a streaming append returns on success.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct AppendResponse {
    pub offset: i64,
}

/// 🔍 Google-style error body: `{"error":{"code":..,"message":..,"status":..,"errors":[..]}}`.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    errors: Vec<ErrorProto>,
}

/// 💀 Turn a non-2xx response into a `SinkError::Api`, squeezing the best reason
/// out of whatever body came back.
pub(crate) async fn api_error(response: reqwest::Response) -> SinkError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorEnvelope>(&body) {
        Ok(envelope) => {
            let reason = envelope
                .error
                .status
                .filter(|s| !s.is_empty())
                .or_else(|| envelope.error.errors.first().map(|e| e.reason.clone()))
                .unwrap_or_else(|| status_reason(status));
            SinkError::api(status.as_u16(), reason, envelope.error.message)
        }
        Err(_) => SinkError::api(status.as_u16(), status_reason(status), body),
    }
}

/// 📡 Reason for a response whose body didn't name one. The transient statuses
/// get the canonical gRPC-style code, everything else its HTTP reason phrase.
pub(crate) fn status_reason(status: reqwest::StatusCode) -> String {
    let code = match status.as_u16() {
        408 | 504 => Some("DEADLINE_EXCEEDED"),
        429 => Some("RESOURCE_EXHAUSTED"),
        500 => Some("INTERNAL"),
        502 | 503 => Some("UNAVAILABLE"),
        _ => None,
    };
    match code {
        Some(code) => code.to_string(),
        None => status
            .canonical_reason()
            .map(str::to_string)
            .unwrap_or_else(|| status.as_str().to_string()),
    }
}

// ===== Row-insert trait and backend enum =====

/// 📨 A client that bulk-inserts rows and reports per-row errors.
///
/// # Contract
/// - `insert_rows` is one network call. `Ok` means the call went through; rows may
///   still have failed individually (see `InsertResponse::insert_errors`).
/// - `Err` means the call as a whole failed. Every row in it is in limbo.
/// - `close` releases the connection. Call it. The lane does.
#[async_trait]
pub trait RowInsertClient: std::fmt::Debug + Send {
    async fn insert_rows(&mut self, rows: Vec<InsertRow>) -> Result<InsertResponse, SinkError>;
    async fn close(&mut self) -> Result<()>;
}

/// 🎭 The many faces of a row-insert client.
#[derive(Debug)]
pub enum RowInsertBackend {
    InMemory(InMemoryRowInsertClient),
    BigQuery(BigQueryInsertClient),
}

impl RowInsertBackend {
    /// 🏗️ Build the client the config asks for. Already authenticated, or as
    /// authenticated as a static bearer token gets.
    pub fn from_config(config: &RowInsertConfig) -> Result<Self> {
        Ok(match config {
            RowInsertConfig::InMemory(c) => Self::InMemory(InMemoryRowInsertClient::new(c)),
            RowInsertConfig::BigQuery(c) => Self::BigQuery(BigQueryInsertClient::new(c.clone())?),
        })
    }
}

#[async_trait]
impl RowInsertClient for RowInsertBackend {
    async fn insert_rows(&mut self, rows: Vec<InsertRow>) -> Result<InsertResponse, SinkError> {
        match self {
            RowInsertBackend::InMemory(c) => c.insert_rows(rows).await,
            RowInsertBackend::BigQuery(c) => c.insert_rows(rows).await,
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self {
            RowInsertBackend::InMemory(c) => c.close().await,
            RowInsertBackend::BigQuery(c) => c.close().await,
        }
    }
}

// ===== Append trait and backend enum =====

/// 🌊 A client that appends a whole batch as one unit.
///
/// # Contract
/// - `append_batch` is one network call, all-or-nothing. `Ok` carries the offset.
/// - `Err` means none of the rows are considered written.
#[async_trait]
pub trait AppendClient: std::fmt::Debug + Send {
    async fn append_batch(&mut self, rows: Vec<WarehouseRow>) -> Result<AppendResponse, SinkError>;
    async fn close(&mut self) -> Result<()>;
}

/// 🎭 The many faces of an append client.
#[derive(Debug)]
pub enum AppendBackend {
    InMemory(InMemoryAppendClient),
    Http(HttpAppendClient),
}

impl AppendBackend {
    pub fn from_config(config: &AppendConfig) -> Result<Self> {
        Ok(match config {
            AppendConfig::InMemory(c) => Self::InMemory(InMemoryAppendClient::new(c)),
            AppendConfig::Http(c) => Self::Http(HttpAppendClient::new(c.clone())?),
        })
    }
}

#[async_trait]
impl AppendClient for AppendBackend {
    async fn append_batch(&mut self, rows: Vec<WarehouseRow>) -> Result<AppendResponse, SinkError> {
        match self {
            AppendBackend::InMemory(c) => c.append_batch(rows).await,
            AppendBackend::Http(c) => c.append_batch(rows).await,
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self {
            AppendBackend::InMemory(c) => c.close().await,
            AppendBackend::Http(c) => c.close().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_every_error_flavor_flattens_to_a_failure() {
        let api = SinkError::api(503, "UNAVAILABLE", "try later");
        assert_eq!(api.to_failure(), SinkFailure::new("UNAVAILABLE", "try later"));

        let transport = SinkError::transport("timeout", "operation timed out");
        assert_eq!(transport.to_failure().reason, "timeout");

        let decode = SinkError::Decode("expected value at line 1".into());
        assert_eq!(decode.to_failure().reason, "decode");
    }

    #[test]
    fn the_one_where_bare_statuses_get_a_code_the_classifier_can_read() {
        use reqwest::StatusCode;
        assert_eq!(status_reason(StatusCode::TOO_MANY_REQUESTS), "RESOURCE_EXHAUSTED");
        assert_eq!(status_reason(StatusCode::BAD_GATEWAY), "UNAVAILABLE");
        assert_eq!(status_reason(StatusCode::SERVICE_UNAVAILABLE), "UNAVAILABLE");
        assert_eq!(status_reason(StatusCode::GATEWAY_TIMEOUT), "DEADLINE_EXCEEDED");
        assert_eq!(status_reason(StatusCode::REQUEST_TIMEOUT), "DEADLINE_EXCEEDED");
        assert_eq!(status_reason(StatusCode::INTERNAL_SERVER_ERROR), "INTERNAL");
        assert_eq!(status_reason(StatusCode::BAD_REQUEST), "Bad Request");
        assert_eq!(status_reason(StatusCode::FORBIDDEN), "Forbidden");
    }

    #[test]
    fn the_one_where_insert_errors_parse_from_the_wire() {
        let body = r#"{
            "kind": "bigquery#tableDataInsertAllResponse",
            "insertErrors": [
                {"index": 2, "errors": [{"reason": "backendError", "message": "boom"}]},
                {"index": 5, "errors": []}
            ]
        }"#;
        let response: InsertResponse = serde_json::from_str(body).expect("💀 should parse");
        assert_eq!(response.insert_errors.len(), 2);
        assert_eq!(
            response.insert_errors[0].to_failure(),
            SinkFailure::new("backendError", "boom")
        );
        assert_eq!(response.insert_errors[1].to_failure().reason, "unknown");

        let clean: InsertResponse =
            serde_json::from_str(r#"{"kind":"x"}"#).expect("💀 should parse");
        assert!(clean.insert_errors.is_empty());
    }
}
