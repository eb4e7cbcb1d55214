//! 🎬 *[camera pans across a dimly lit server room]*
//! 🎬 *[two pipes. one faucet. a stopwatch on each.]*
//! 🎬 "In a world where every message must be written twice..."
//! 🎬 *[record scratch]* 🦆
//!
//! 📦 The supervisor module — home of the [`DualPathWriter`], the part middle
//! manager, part helicopter parent that owns both lanes and all their workers.
//!
//! 🧠 Knowledge graph:
//! - A [`Lane`] is one strategy's intake: its pending buffer, its flush trigger
//!   (capacity-1 channel, so pending triggers coalesce), and its threshold.
//! - `enqueue` fans one `Arc<Message>` out to both lanes. It never blocks on I/O
//!   and never fails. At or above the threshold it `try_send`s a trigger; a full
//!   channel means a flush is already on its way.
//! - Each lane has exactly one `FlushWorker`. The `SchedulerWorker` and the
//!   threshold check both reduce to "post a trigger".
//! - Lanes share nothing but the `PerformanceAggregator`. One path falling over
//!   does not slow the other down.
//!
//! ⚠️ DO NOT MAKE `workers` PUB. Like Fight Club, but for async tasks.

mod workers;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result, anyhow};
use async_channel::{Receiver, Sender, TrySendError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace};

use crate::app_config::{AppConfig, RuntimeConfig};
use crate::backends::{AppendBackend, RowInsertBackend};
use crate::common::{Message, StrategyId};
use crate::performance::{PerformanceAggregator, PerformanceReport, StatsSnapshot};
use crate::queue::PendingBuffer;
use crate::retry::RetryExecutor;
use crate::strategies::{
    RowInsertStrategy, SinkStrategy, StrategyBackend, StreamingAppendStrategy,
};
use workers::{FlushWorker, ReportWorker, SchedulerWorker, Worker};

// -- 📣 progress line cadence, in enqueued messages
const PROGRESS_EVERY: u64 = 1_000;

/// 🛣️ One strategy's intake side. Cheap to clone: the buffer is shared and the
/// sender is a handle.
#[derive(Debug, Clone)]
pub(crate) struct Lane {
    strategy: StrategyId,
    buffer: Arc<PendingBuffer>,
    trigger: Sender<()>,
    threshold: usize,
}

impl Lane {
    fn new(strategy: StrategyId, threshold: usize) -> (Self, Receiver<()>) {
        let (trigger, receiver) = async_channel::bounded(1);
        let lane = Self {
            strategy,
            buffer: Arc::new(PendingBuffer::new()),
            trigger,
            threshold: threshold.max(1),
        };
        (lane, receiver)
    }

    pub(crate) fn strategy(&self) -> StrategyId {
        self.strategy
    }

    pub(crate) fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// 📥 Queue one message, nudging the flush worker if the threshold is reached.
    fn offer(&self, message: Arc<Message>) {
        let pending = self.buffer.enqueue(message);
        if pending >= self.threshold {
            self.nudge();
        }
    }

    /// 👉 Post a flush trigger without waiting.
    pub(crate) fn nudge(&self) {
        match self.trigger.try_send(()) {
            Ok(()) => trace!("👉 {} flush triggered", self.strategy),
            // -- 💤 a trigger is already waiting; the worker will drain everything anyway
            Err(TrySendError::Full(())) => {}
            Err(TrySendError::Closed(())) => {
                debug!("🏁 {} trigger after shutdown ignored", self.strategy)
            }
        }
    }

    fn close(&self) {
        self.trigger.close();
    }
}

/// 🧩 What it takes to open one lane: a strategy and its flush threshold.
#[derive(Debug)]
pub struct LaneSpec {
    pub strategy: StrategyBackend,
    pub flush_threshold: usize,
}

impl LaneSpec {
    pub fn new(strategy: impl Into<StrategyBackend>, flush_threshold: usize) -> Self {
        Self {
            strategy: strategy.into(),
            flush_threshold,
        }
    }
}

/// 🚀 The dual-path buffered writer.
///
/// Build it inside a tokio runtime (it spawns its workers immediately), feed it
/// with [`enqueue`](Self::enqueue), peek with [`stats`](Self::stats), and finish
/// with [`shutdown`](Self::shutdown), which flushes what's left and returns the
/// final report.
#[derive(Debug)]
pub struct DualPathWriter {
    lanes: Vec<Lane>,
    aggregator: Arc<PerformanceAggregator>,
    enqueued: AtomicU64,
    shutdown_tx: watch::Sender<bool>,
    report_stop: Sender<()>,
    scheduler: JoinHandle<Result<()>>,
    flushers: Vec<(StrategyId, JoinHandle<Result<()>>)>,
    reporter: JoinHandle<Result<()>>,
}

impl DualPathWriter {
    /// 🏗️ Build both sink clients from config and start the writer.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let runtime = &config.runtime;
        let row_insert = RowInsertBackend::from_config(&config.row_insert)
            .context("💀 Could not build the row-insert client")?;
        let streaming_append = AppendBackend::from_config(&config.streaming_append)
            .context("💀 Could not build the streaming-append client")?;
        Ok(Self::start(
            runtime,
            LaneSpec::new(
                RowInsertStrategy::new(row_insert),
                config
                    .row_insert
                    .common_config()
                    .flush_threshold_or(runtime.flush_threshold),
            ),
            LaneSpec::new(
                StreamingAppendStrategy::new(streaming_append),
                config
                    .streaming_append
                    .common_config()
                    .flush_threshold_or(runtime.flush_threshold),
            ),
        ))
    }

    /// 🧵 Open both lanes and spawn every worker. Must be called from within a
    /// tokio runtime.
    pub fn start(runtime: &RuntimeConfig, row_insert: LaneSpec, streaming_append: LaneSpec) -> Self {
        let aggregator = Arc::new(PerformanceAggregator::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let policy = runtime.retry_policy();

        let mut lanes = Vec::with_capacity(2);
        let mut flushers = Vec::with_capacity(2);
        for opening in [row_insert, streaming_append] {
            let strategy_id = opening.strategy.id();
            let (lane, trigger) = Lane::new(strategy_id, opening.flush_threshold);
            let worker = FlushWorker::new(
                Arc::clone(&lane.buffer),
                trigger,
                opening.strategy,
                RetryExecutor::new(policy, shutdown_rx.clone()),
                Arc::clone(&aggregator),
                lane.threshold,
            );
            info!(
                "🛣️ {} lane open: flush at {} pending, up to {} retries",
                strategy_id, lane.threshold, policy.max_retry_attempts
            );
            flushers.push((strategy_id, worker.start()));
            lanes.push(lane);
        }

        let scheduler =
            SchedulerWorker::new(lanes.clone(), runtime.flush_interval(), shutdown_rx).start();
        let (report_stop, report_stop_rx) = async_channel::bounded(1);
        let reporter =
            ReportWorker::new(Arc::clone(&aggregator), runtime.report_interval(), report_stop_rx)
                .start();

        Self {
            lanes,
            aggregator,
            enqueued: AtomicU64::new(0),
            shutdown_tx,
            report_stop,
            scheduler,
            flushers,
            reporter,
        }
    }

    /// 📥 Hand one message to both lanes. Never blocks on I/O, never fails.
    pub fn enqueue(&self, message: Message) {
        let message = Arc::new(message);
        for lane in &self.lanes {
            lane.offer(Arc::clone(&message));
        }
        let total = self.enqueued.fetch_add(1, Ordering::Relaxed) + 1;
        if total % PROGRESS_EVERY == 0 {
            info!(
                "📣 {} messages enqueued ({} pending)",
                total,
                self.lanes
                    .iter()
                    .map(|lane| format!("{}: {}", lane.strategy, lane.pending()))
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
    }

    /// 🔢 Messages accepted so far.
    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    /// 🔢 Messages waiting in one lane's buffer.
    pub fn pending(&self, strategy: StrategyId) -> usize {
        self.lanes
            .iter()
            .find(|lane| lane.strategy == strategy)
            .map_or(0, Lane::pending)
    }

    /// 📸 Current counters for both strategies.
    pub fn stats(&self) -> [StatsSnapshot; 2] {
        self.aggregator.snapshots()
    }

    pub fn report(&self) -> PerformanceReport {
        self.aggregator.report()
    }

    /// 🏁 Stop the scheduler, cut any backoff short, flush what's left, close both
    /// clients, and return the final report.
    ///
    /// Every worker is awaited even if an earlier one failed; the first failure is
    /// returned after the rest have been given the chance to finish.
    pub async fn shutdown(self) -> Result<PerformanceReport> {
        info!("🛑 shutting down the writer after {} messages", self.enqueued());
        // -- 📡 send_replace never fails, even when every receiver has already left
        self.shutdown_tx.send_replace(true);
        let mut first_error = None;

        collect(&mut first_error, "flush scheduler", self.scheduler.await);
        for lane in &self.lanes {
            lane.close();
        }
        for (strategy, handle) in self.flushers {
            collect(&mut first_error, &format!("{strategy} flush worker"), handle.await);
        }
        self.report_stop.close();
        collect(&mut first_error, "report worker", self.reporter.await);

        match first_error {
            Some(err) => Err(err),
            None => Ok(self.aggregator.report()),
        }
    }
}

fn collect(
    first_error: &mut Option<anyhow::Error>,
    what: &str,
    joined: Result<Result<()>, tokio::task::JoinError>,
) {
    let err = match joined {
        Ok(Ok(())) => return,
        Ok(Err(err)) => err.context(format!("💀 {what} failed")),
        Err(join_err) => anyhow!("💀 {what} panicked or was cancelled: {join_err}"),
    };
    error!("{:#}", err);
    first_error.get_or_insert(err);
}
