//! 🚀 twinsink — one message stream, two write paths, one honest comparison.
//!
//! Every message handed to the [`DualPathWriter`] is buffered twice: once for a
//! row-insert API that grades rows individually, once for a streaming-append API
//! that takes whole batches and hands back an offset. Each lane flushes on its
//! own threshold or on a shared timer, retries what the sink calls transient,
//! logs what it has to drop, and feeds the same lock-free scoreboard.
//!
//! 🦆 The duck wanted a third path. The duck was outvoted.

pub mod app_config;
pub mod backends;
pub mod common;
pub mod performance;
pub mod queue;
pub mod retry;
pub mod sources;
pub mod strategies;
pub mod supervisors;
pub mod transforms;

use std::time::Instant;

use anyhow::{Context, Result};
use tracing::info;

use crate::app_config::AppConfig;
use crate::performance::PerformanceReport;
use crate::sources::{Source, SourceBackend};

pub use crate::supervisors::{DualPathWriter, LaneSpec};

// -- 🧘 let the flush workers breathe now and then during a tight produce loop
const YIELD_EVERY: u64 = 1_000;

/// 🏃 The performance run: build the source and the writer, pour every message
/// in, shut down, and hand back the final comparison.
///
/// The writer is shut down (and so flushed) even if the source breaks halfway;
/// the source error is reported after the flush.
pub async fn run(app_config: AppConfig) -> Result<PerformanceReport> {
    let mut source = SourceBackend::from_config(&app_config.source)
        .await
        .context("💀 Could not open the message source")?;
    let writer = DualPathWriter::from_config(&app_config)?;

    let started = Instant::now();
    let fed = feed(&mut source, &writer).await;
    info!(
        "🚰 source done: {} messages enqueued in {:?}",
        writer.enqueued(),
        started.elapsed()
    );

    let report = writer
        .shutdown()
        .await
        .context("💀 The writer did not shut down cleanly")?;
    fed.context("💀 The message source failed mid-run")?;
    info!("🏆 run complete in {:?}", started.elapsed());
    Ok(report)
}

async fn feed(source: &mut SourceBackend, writer: &DualPathWriter) -> Result<()> {
    let mut count = 0u64;
    while let Some(message) = source.next_message().await? {
        writer.enqueue(message);
        count += 1;
        if count % YIELD_EVERY == 0 {
            tokio::task::yield_now().await;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_config::SourceConfig;
    use crate::sources::SyntheticSourceConfig;

    #[tokio::test]
    async fn the_one_where_a_dry_run_writes_everything_twice() {
        let config = AppConfig {
            source: SourceConfig::Synthetic(SyntheticSourceConfig {
                message_count: 1_234,
                source_tag: "dry-run".into(),
            }),
            ..AppConfig::default()
        };
        let report = run(config).await.expect("💀 dry run should succeed");
        assert_eq!(report.row_insert.total_records, 1_234);
        assert_eq!(report.streaming_append.total_records, 1_234);
        assert_eq!(report.row_insert.failed_records, 0);
        // -- 🧮 1234 at a threshold of 500 is at least three batches per lane
        assert!(report.row_insert.batches >= 3);
    }
}
