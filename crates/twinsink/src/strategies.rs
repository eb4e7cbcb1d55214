//! 🎭 Strategies — the two contestants.
//!
//! 🎬 *[two write paths step into the ring. same messages. different gloves.]*
//!
//! A strategy turns a slice of messages into one sink call and a [`WriteOutcome`].
//! It converts (via `transforms`), calls its client (via `backends`), and maps the
//! sink's verdict back onto the slice it was given. It does not retry. It does not
//! buffer. It does not sleep. The retry executor does the worrying.
//!
//! 🧠 Knowledge graph:
//! - `RowInsertStrategy`: per-row verdicts, so only the sulking rows get retried
//! - `StreamingAppendStrategy`: one verdict for the whole batch, plus an offset
//! - `StrategyBackend`: the enum both lanes hold, dispatching `SinkStrategy`
//!
//! 🦆

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::common::{Message, StrategyId, WriteOutcome};

pub mod row_insert;
pub mod streaming_append;

pub use row_insert::RowInsertStrategy;
pub use streaming_append::StreamingAppendStrategy;

/// 🎯 The capability both paths share.
///
/// # Contract 📜
/// - `write` makes at most one network call and never fails outright: every
///   problem lands in the outcome, keyed by index into `messages`.
/// - Conversion errors go in `rejected` and are never sent.
/// - `close` releases the client. Called exactly once, at lane shutdown.
#[async_trait]
pub trait SinkStrategy: std::fmt::Debug + Send {
    fn id(&self) -> StrategyId;
    async fn write(&mut self, messages: &[Arc<Message>]) -> WriteOutcome;
    async fn close(&mut self) -> Result<()>;
}

/// 🎭 Row-insert or streaming-append. That's the whole menu.
#[derive(Debug)]
pub enum StrategyBackend {
    RowInsert(RowInsertStrategy),
    StreamingAppend(StreamingAppendStrategy),
}

#[async_trait]
impl SinkStrategy for StrategyBackend {
    fn id(&self) -> StrategyId {
        match self {
            StrategyBackend::RowInsert(s) => s.id(),
            StrategyBackend::StreamingAppend(s) => s.id(),
        }
    }

    async fn write(&mut self, messages: &[Arc<Message>]) -> WriteOutcome {
        match self {
            StrategyBackend::RowInsert(s) => s.write(messages).await,
            StrategyBackend::StreamingAppend(s) => s.write(messages).await,
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self {
            StrategyBackend::RowInsert(s) => s.close().await,
            StrategyBackend::StreamingAppend(s) => s.close().await,
        }
    }
}

impl From<RowInsertStrategy> for StrategyBackend {
    fn from(strategy: RowInsertStrategy) -> Self {
        StrategyBackend::RowInsert(strategy)
    }
}

impl From<StreamingAppendStrategy> for StrategyBackend {
    fn from(strategy: StreamingAppendStrategy) -> Self {
        StrategyBackend::StreamingAppend(strategy)
    }
}
