//! 📊 The ReportWorker reads the scoreboard out loud every `report_interval`,
//! and one last time when told to stop (after the lanes have finished their final
//! flush, so the last report is the real total).

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_channel::Receiver;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::info;

use super::Worker;
use crate::performance::PerformanceAggregator;

#[derive(Debug)]
pub(crate) struct ReportWorker {
    aggregator: Arc<PerformanceAggregator>,
    period: Duration,
    stop: Receiver<()>,
}

impl ReportWorker {
    pub(crate) fn new(
        aggregator: Arc<PerformanceAggregator>,
        period: Duration,
        stop: Receiver<()>,
    ) -> Self {
        Self {
            aggregator,
            period,
            stop,
        }
    }
}

impl Worker for ReportWorker {
    fn start(self) -> JoinHandle<Result<()>> {
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + self.period, self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        info!("📊 performance so far:\n{}", self.aggregator.report());
                    }
                    // -- 🏁 nobody ever sends on this channel; closing it is the signal
                    _ = self.stop.recv() => break,
                }
            }
            info!("📊 final performance report:\n{}", self.aggregator.report());
            Ok(())
        })
    }
}
