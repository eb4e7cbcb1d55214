//! 🌊 Streaming-append strategy: the whole batch goes as one unit, and comes
//! back as one verdict. No partial credit. The stream is a strict grader.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};

use crate::backends::{AppendBackend, AppendClient};
use crate::common::{Message, StrategyId, WriteOutcome};
use crate::strategies::SinkStrategy;
use crate::transforms::to_warehouse_row;

#[derive(Debug)]
pub struct StreamingAppendStrategy {
    client: AppendBackend,
    /// 🌊 Offset of the last accepted append. Offsets should only go up.
    last_offset: Option<i64>,
}

impl StreamingAppendStrategy {
    pub fn new(client: AppendBackend) -> Self {
        Self {
            client,
            last_offset: None,
        }
    }

    pub fn last_offset(&self) -> Option<i64> {
        self.last_offset
    }
}

#[async_trait]
impl SinkStrategy for StreamingAppendStrategy {
    fn id(&self) -> StrategyId {
        StrategyId::StreamingAppend
    }

    async fn write(&mut self, messages: &[Arc<Message>]) -> WriteOutcome {
        let now = Utc::now();
        let mut outcome = WriteOutcome {
            attempted: messages.len(),
            ..Default::default()
        };

        let mut rows = Vec::with_capacity(messages.len());
        let mut sent_index = Vec::with_capacity(messages.len());
        for (i, message) in messages.iter().enumerate() {
            match to_warehouse_row(message, now) {
                Ok(row) => {
                    rows.push(row);
                    sent_index.push(i);
                }
                Err(err) => {
                    outcome.rejected.insert(i, err.to_string());
                }
            }
        }
        if rows.is_empty() {
            return outcome.tally();
        }

        match self.client.append_batch(rows).await {
            Ok(response) => {
                if let Some(previous) = self.last_offset
                    && response.offset <= previous
                {
                    warn!(
                        "⚠️ append offset went from {} to {}; the stream is supposed to only move forward",
                        previous, response.offset
                    );
                }
                self.last_offset = Some(response.offset);
                outcome.offset = Some(response.offset);
            }
            Err(err) => {
                // 💀 all or nothing, and this time it was nothing
                let failure = err.to_failure();
                debug!("🌊 append failed for the whole batch: {}", err);
                for &i in &sent_index {
                    outcome.failures.insert(i, failure.clone());
                }
            }
        }
        outcome.tally()
    }

    async fn close(&mut self) -> Result<()> {
        self.client.close().await
    }
}
