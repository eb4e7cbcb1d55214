//! ⏰ The SchedulerWorker: a single clock for both lanes.
//!
//! Every `flush_interval` it looks at each lane and, if anything is pending,
//! posts a flush trigger. Empty lanes get nothing. A tick that finds a trigger
//! already queued leaves it alone; one pending flush is as good as two.
//!
//! Fixed-delay: a tick that runs late pushes the next one back instead of firing
//! a burst to catch up. The first tick is one full period after start.

use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, trace};

use super::Worker;
use crate::supervisors::Lane;

#[derive(Debug)]
pub(crate) struct SchedulerWorker {
    lanes: Vec<Lane>,
    period: Duration,
    shutdown: watch::Receiver<bool>,
}

impl SchedulerWorker {
    pub(crate) fn new(lanes: Vec<Lane>, period: Duration, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            lanes,
            period,
            shutdown,
        }
    }
}

impl Worker for SchedulerWorker {
    fn start(mut self) -> JoinHandle<Result<()>> {
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + self.period, self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!("⏰ flush scheduler started, every {:?}", self.period);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        for lane in &self.lanes {
                            if !lane.is_empty() {
                                trace!("⏰ tick: {} has {} pending", lane.strategy(), lane.pending());
                                lane.nudge();
                            }
                        }
                    }
                    changed = self.shutdown.changed() => {
                        if changed.is_err() || *self.shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("⏰ flush scheduler stopped");
            Ok(())
        })
    }
}
