//! 🎬 *[a trigger lands in a channel. somewhere, a buffer is about to be emptied.]*
//!
//! 🗑️ The FlushWorker: one per lane, and the only thing that ever drains that
//! lane's buffer. Flushes for one strategy are therefore serialized and never
//! share a snapshot. It receives a nudge, takes everything pending, cuts it into
//! batches no bigger than the threshold, and walks each one through the retry
//! executor. Then it writes the result on the scoreboard and waits again.
//!
//! 🏁 When the trigger channel closes (shutdown), it does one last drain so the
//! stragglers get their flight, closes its strategy, and leaves.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_channel::Receiver;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::Worker;
use crate::common::Batch;
use crate::performance::PerformanceAggregator;
use crate::queue::PendingBuffer;
use crate::retry::RetryExecutor;
use crate::strategies::{SinkStrategy, StrategyBackend};

#[derive(Debug)]
pub(crate) struct FlushWorker {
    buffer: Arc<PendingBuffer>,
    trigger: Receiver<()>,
    strategy: StrategyBackend,
    executor: RetryExecutor,
    aggregator: Arc<PerformanceAggregator>,
    batch_limit: usize,
}

impl FlushWorker {
    pub(crate) fn new(
        buffer: Arc<PendingBuffer>,
        trigger: Receiver<()>,
        strategy: StrategyBackend,
        executor: RetryExecutor,
        aggregator: Arc<PerformanceAggregator>,
        batch_limit: usize,
    ) -> Self {
        Self {
            buffer,
            trigger,
            strategy,
            executor,
            aggregator,
            batch_limit: batch_limit.max(1),
        }
    }

    /// 🚿 Drain once and push every resulting batch through the executor.
    async fn flush(&mut self) {
        let drained = self.buffer.drain_all();
        if drained.is_empty() {
            return;
        }
        let strategy_id = self.strategy.id();
        debug!("🚿 {} flushing {} pending messages", strategy_id, drained.len());

        for chunk in drained.chunks(self.batch_limit) {
            let report = self
                .executor
                .execute(&mut self.strategy, Batch::new(chunk.to_vec()))
                .await;
            self.aggregator
                .record(strategy_id, report.succeeded as u64, report.duration_ms());
            if report.permanently_failed > 0 {
                self.aggregator
                    .record_failures(strategy_id, report.permanently_failed as u64);
            }
            if report.retries() > 0 {
                self.aggregator
                    .record_retries(strategy_id, u64::from(report.retries()));
            }
            debug!(
                "📋 {} batch done: {}/{} succeeded in {:?} over {} attempts",
                strategy_id, report.succeeded, report.batch_size, report.duration, report.attempts
            );
        }
    }
}

impl Worker for FlushWorker {
    fn start(mut self) -> JoinHandle<Result<()>> {
        tokio::spawn(async move {
            let strategy_id = self.strategy.id();
            debug!("📥 {} flush worker started", strategy_id);
            loop {
                match self.trigger.recv().await {
                    Ok(()) => self.flush().await,
                    Err(_) => {
                        // -- 🏁 channel closed and empty: last call for stragglers
                        let leftover = self.buffer.len();
                        if leftover > 0 {
                            info!("🏁 {} final flush of {} messages", strategy_id, leftover);
                        }
                        self.flush().await;
                        self.strategy
                            .close()
                            .await
                            .context(format!("💀 {strategy_id} failed to close its sink client"))?;
                        debug!("🏁 {} flush worker finished", strategy_id);
                        return Ok(());
                    }
                }
            }
        })
    }
}
