//! # Previously, on twinsink...
//!
//! 🎬 The warehouse was far away. The credentials were expired. The benchmark was
//! due at 9am. Someone had to pretend to be a sink. Convincingly.
//!
//! That someone was this module.
//!
//! `in_mem` provides in-memory [`RowInsertClient`] and [`AppendClient`] doubles.
//! They record every call behind an `Arc<Mutex<...>>` so tests can peek after the
//! client has been moved into a strategy, they can sleep a configurable latency to
//! look busy in a dry run, and they accept a scripted responder so tests can make
//! them fail on cue. Like a stunt double, but for the network.
//!
//! 🦆
//!
//! ⚠️ No network calls. No disk I/O. No warehouse. Just heap memory and intent.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::backends::common_config::CommonSinkConfig;
use crate::backends::{
    AppendClient, AppendResponse, InsertResponse, RowInsertClient, SinkError,
};
use crate::transforms::{InsertRow, WarehouseRow};

/// 🔧 Config for the in-memory doubles.
#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct InMemoryConfig {
    /// ⏱️ Pretend every call takes this long. 0 → instant, like nothing ever happens.
    #[serde(default)]
    pub latency_ms: u64,
    #[serde(flatten, default)]
    pub common_config: CommonSinkConfig,
}

/// 🎬 Decides the fate of call number `n` (0-based) given the rows it carried.
pub type InsertResponder =
    Arc<dyn Fn(usize, &[InsertRow]) -> Result<InsertResponse, SinkError> + Send + Sync>;

/// 🎬 Same idea for appends. `Ok(())` means "accepted"; the client picks the offset.
pub type AppendResponder = Arc<dyn Fn(usize, &[WarehouseRow]) -> Result<(), SinkError> + Send + Sync>;

// ===== Row insert =====

/// 📨 An insert sink that never forgets. Clone it before handing it off and keep
/// the clone for assertions; the `Arc`s mean everyone sees the same ledger.
#[derive(Clone, Default)]
pub struct InMemoryRowInsertClient {
    calls: Arc<Mutex<Vec<Vec<InsertRow>>>>,
    responder: Option<InsertResponder>,
    latency: Duration,
    closed: Arc<AtomicBool>,
}

// -- 🎭 manual Debug because closures are divas and refuse to derive it
impl std::fmt::Debug for InMemoryRowInsertClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryRowInsertClient")
            .field("latency", &self.latency)
            .field("scripted", &self.responder.is_some())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl InMemoryRowInsertClient {
    pub fn new(config: &InMemoryConfig) -> Self {
        Self {
            latency: Duration::from_millis(config.latency_ms),
            ..Self::default()
        }
    }

    /// 🎬 Script the sink's answers. The responder sees the call number and rows.
    pub fn with_responder<F>(mut self, responder: F) -> Self
    where
        F: Fn(usize, &[InsertRow]) -> Result<InsertResponse, SinkError> + Send + Sync + 'static,
    {
        self.responder = Some(Arc::new(responder));
        self
    }

    /// 📋 Every call so far, rows and all, in call order.
    pub async fn calls(&self) -> Vec<Vec<InsertRow>> {
        self.calls.lock().await.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }

    /// 🔢 Total rows that were part of a call (accepted or not).
    pub async fn rows_seen(&self) -> usize {
        self.calls.lock().await.iter().map(Vec::len).sum()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl RowInsertClient for InMemoryRowInsertClient {
    async fn insert_rows(&mut self, rows: Vec<InsertRow>) -> Result<InsertResponse, SinkError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        // 🔒 record first, then ask the script; the call happened either way
        let call_number = {
            let mut calls = self.calls.lock().await;
            calls.push(rows.clone());
            calls.len() - 1
        };
        match &self.responder {
            Some(responder) => responder(call_number, &rows),
            None => Ok(InsertResponse::default()),
        }
    }

    async fn close(&mut self) -> Result<()> {
        // -- 🗑️ nothing to release but our dignity
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

// ===== Append =====

/// 🌊 An append sink with a pretend stream. Offsets count rows, starting at 0,
/// and only move forward when an append is accepted.
#[derive(Clone, Default)]
pub struct InMemoryAppendClient {
    calls: Arc<Mutex<Vec<Vec<WarehouseRow>>>>,
    next_offset: Arc<Mutex<i64>>,
    responder: Option<AppendResponder>,
    latency: Duration,
    closed: Arc<AtomicBool>,
}

impl std::fmt::Debug for InMemoryAppendClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryAppendClient")
            .field("latency", &self.latency)
            .field("scripted", &self.responder.is_some())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl InMemoryAppendClient {
    pub fn new(config: &InMemoryConfig) -> Self {
        Self {
            latency: Duration::from_millis(config.latency_ms),
            ..Self::default()
        }
    }

    pub fn with_responder<F>(mut self, responder: F) -> Self
    where
        F: Fn(usize, &[WarehouseRow]) -> Result<(), SinkError> + Send + Sync + 'static,
    {
        self.responder = Some(Arc::new(responder));
        self
    }

    pub async fn calls(&self) -> Vec<Vec<WarehouseRow>> {
        self.calls.lock().await.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }

    pub async fn rows_seen(&self) -> usize {
        self.calls.lock().await.iter().map(Vec::len).sum()
    }

    /// 🌊 Rows accepted so far, a.k.a. the next offset to hand out.
    pub async fn committed_rows(&self) -> i64 {
        *self.next_offset.lock().await
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl AppendClient for InMemoryAppendClient {
    async fn append_batch(&mut self, rows: Vec<WarehouseRow>) -> Result<AppendResponse, SinkError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let call_number = {
            let mut calls = self.calls.lock().await;
            calls.push(rows.clone());
            calls.len() - 1
        };
        if let Some(responder) = &self.responder {
            responder(call_number, &rows)?;
        }
        let mut next_offset = self.next_offset.lock().await;
        let offset = *next_offset;
        *next_offset += rows.len() as i64;
        Ok(AppendResponse { offset })
    }

    async fn close(&mut self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
