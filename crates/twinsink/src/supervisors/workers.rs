//! 🧵 Workers: the ones who actually do the work while the writer takes all the
//! credit in the sprint retro.
//!
//! - [`FlushWorker`]: one per lane. Waits for a trigger, drains, retries, records.
//! - [`SchedulerWorker`]: one per writer. Nudges lanes that have stragglers.
//! - [`ReportWorker`]: one per writer. Reads the scoreboard out loud, periodically.
//!
//! ⚠️ "If you're reading this, the code review went poorly."

use anyhow::Result;
use tokio::task::JoinHandle;

mod flush_worker;
mod report_worker;
mod scheduler_worker;

pub(crate) use flush_worker::FlushWorker;
pub(crate) use report_worker::ReportWorker;
pub(crate) use scheduler_worker::SchedulerWorker;

/// 🏗️ A background worker, that does work. duh.
///
/// "What's the DEAL with lifetime annotations? You borrow something,
///  you give it back. It's not that hard, Jerry!" — Seinfeld, on Rust
pub(crate) trait Worker {
    /// 🚀 Start the worker. Returns a JoinHandle because we trust
    /// but verify. Mostly verify.
    fn start(self) -> JoinHandle<Result<()>>;
}
