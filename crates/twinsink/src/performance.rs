//! 📊 performance.rs — "So which one is faster?" — the only question anybody asks.
//!
//! 🚀 Both flush workers shout their results in here, concurrently, without ever
//! taking a lock. Totals are `fetch_add`. Min and max are compare-and-swap loops,
//! the old-fashioned way: read, compare, try to swap, lose the race, try again.
//!
//! ⚠️ Fields are individually exact but not mutually consistent. A snapshot taken
//! mid-record may show the records of a batch without its time. It's a benchmark,
//! not a bank.
//!
//! 🦆 The duck is timing both paths with a stopwatch. It is not impressed.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::UTF8_FULL};

use crate::common::StrategyId;

/// 🔢 Formats a number with commas. "1000000 records" → "1,000,000 records".
fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result
}

/// 📈 Per-strategy counters. All atomics, all the time.
#[derive(Debug)]
pub struct StrategyStats {
    total_records: AtomicU64,
    total_time_ms: AtomicU64,
    /// 🔽 Starts at `u64::MAX`, the traditional "nothing recorded yet" sentinel.
    min_batch_time_ms: AtomicU64,
    max_batch_time_ms: AtomicU64,
    batches: AtomicU64,
    failed_records: AtomicU64,
    retries: AtomicU64,
}

impl Default for StrategyStats {
    fn default() -> Self {
        Self::new()
    }
}

impl StrategyStats {
    pub const fn new() -> Self {
        Self {
            total_records: AtomicU64::new(0),
            total_time_ms: AtomicU64::new(0),
            min_batch_time_ms: AtomicU64::new(u64::MAX),
            max_batch_time_ms: AtomicU64::new(0),
            batches: AtomicU64::new(0),
            failed_records: AtomicU64::new(0),
            retries: AtomicU64::new(0),
        }
    }

    fn record(&self, record_count: u64, duration_ms: u64) {
        self.total_records.fetch_add(record_count, Ordering::Relaxed);
        self.total_time_ms.fetch_add(duration_ms, Ordering::Relaxed);
        self.batches.fetch_add(1, Ordering::Relaxed);
        update_min(&self.min_batch_time_ms, duration_ms);
        update_max(&self.max_batch_time_ms, duration_ms);
    }

    fn snapshot(&self, strategy: StrategyId) -> StatsSnapshot {
        let min = self.min_batch_time_ms.load(Ordering::Relaxed);
        StatsSnapshot {
            strategy,
            total_records: self.total_records.load(Ordering::Relaxed),
            total_time_ms: self.total_time_ms.load(Ordering::Relaxed),
            min_batch_time_ms: if min == u64::MAX { 0 } else { min },
            max_batch_time_ms: self.max_batch_time_ms.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
            failed_records: self.failed_records.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }
}

// -- 🔄 read, compare, swap, and if someone beat us to it, look again
fn update_min(cell: &AtomicU64, candidate: u64) {
    let mut current = cell.load(Ordering::Relaxed);
    while candidate < current {
        match cell.compare_exchange_weak(current, candidate, Ordering::Relaxed, Ordering::Relaxed)
        {
            Ok(_) => break,
            Err(actual) => current = actual,
        }
    }
}

fn update_max(cell: &AtomicU64, candidate: u64) {
    let mut current = cell.load(Ordering::Relaxed);
    while candidate > current {
        match cell.compare_exchange_weak(current, candidate, Ordering::Relaxed, Ordering::Relaxed)
        {
            Ok(_) => break,
            Err(actual) => current = actual,
        }
    }
}

/// 📸 A point-in-time copy of one strategy's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub strategy: StrategyId,
    pub total_records: u64,
    pub total_time_ms: u64,
    /// 🔽 0 when no batch has been recorded.
    pub min_batch_time_ms: u64,
    pub max_batch_time_ms: u64,
    pub batches: u64,
    pub failed_records: u64,
    pub retries: u64,
}

impl StatsSnapshot {
    /// 🚀 Records per second of write time. 0 when either side of the fraction is 0.
    pub fn throughput(&self) -> f64 {
        if self.total_records == 0 || self.total_time_ms == 0 {
            return 0.0;
        }
        self.total_records as f64 / self.total_time_ms as f64 * 1000.0
    }

    pub fn average_batch_time_ms(&self) -> f64 {
        if self.batches == 0 {
            return 0.0;
        }
        self.total_time_ms as f64 / self.batches as f64
    }
}

/// 🏁 The aggregator. One per writer, shared by both lanes behind an `Arc`.
#[derive(Debug, Default)]
pub struct PerformanceAggregator {
    row_insert: StrategyStats,
    streaming_append: StrategyStats,
}

impl PerformanceAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    fn stats(&self, strategy: StrategyId) -> &StrategyStats {
        match strategy {
            StrategyId::RowInsert => &self.row_insert,
            StrategyId::StreamingAppend => &self.streaming_append,
        }
    }

    /// 📥 One finished batch: how many records made it and how long it took.
    pub fn record(&self, strategy: StrategyId, record_count: u64, duration_ms: u64) {
        self.stats(strategy).record(record_count, duration_ms);
    }

    pub fn record_failures(&self, strategy: StrategyId, failed: u64) {
        self.stats(strategy)
            .failed_records
            .fetch_add(failed, Ordering::Relaxed);
    }

    pub fn record_retries(&self, strategy: StrategyId, retries: u64) {
        self.stats(strategy)
            .retries
            .fetch_add(retries, Ordering::Relaxed);
    }

    pub fn snapshot(&self, strategy: StrategyId) -> StatsSnapshot {
        self.stats(strategy).snapshot(strategy)
    }

    /// 📸 Both strategies, in `StrategyId::ALL` order.
    pub fn snapshots(&self) -> [StatsSnapshot; 2] {
        StrategyId::ALL.map(|id| self.snapshot(id))
    }

    /// 📊 Side-by-side comparison. Never panics, not even on an empty run.
    pub fn report(&self) -> PerformanceReport {
        let row_insert = self.snapshot(StrategyId::RowInsert);
        let streaming_append = self.snapshot(StrategyId::StreamingAppend);
        let baseline = row_insert.throughput();
        let ratio = if baseline > 0.0 {
            Some(streaming_append.throughput() / baseline)
        } else {
            None
        };
        PerformanceReport {
            row_insert,
            streaming_append,
            ratio,
        }
    }
}

/// 🏆 The comparison everyone came here for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerformanceReport {
    pub row_insert: StatsSnapshot,
    pub streaming_append: StatsSnapshot,
    /// ⚖️ streaming-append throughput ÷ row-insert throughput. `None` when the
    /// row-insert side has nothing to divide by.
    pub ratio: Option<f64>,
}

impl fmt::Display for PerformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec![
            Cell::new("strategy"),
            Cell::new("records"),
            Cell::new("batches"),
            Cell::new("records/s"),
            Cell::new("avg ms"),
            Cell::new("min ms"),
            Cell::new("max ms"),
            Cell::new("failed"),
            Cell::new("retries"),
        ]);
        for stats in [&self.row_insert, &self.streaming_append] {
            table.add_row(vec![
                Cell::new(stats.strategy),
                Cell::new(format_number(stats.total_records)).set_alignment(CellAlignment::Right),
                Cell::new(format_number(stats.batches)).set_alignment(CellAlignment::Right),
                Cell::new(format!("{:.2}", stats.throughput())).set_alignment(CellAlignment::Right),
                Cell::new(format!("{:.2}", stats.average_batch_time_ms()))
                    .set_alignment(CellAlignment::Right),
                Cell::new(stats.min_batch_time_ms).set_alignment(CellAlignment::Right),
                Cell::new(stats.max_batch_time_ms).set_alignment(CellAlignment::Right),
                Cell::new(format_number(stats.failed_records)).set_alignment(CellAlignment::Right),
                Cell::new(format_number(stats.retries)).set_alignment(CellAlignment::Right),
            ]);
        }
        writeln!(f, "{table}")?;
        match self.ratio {
            Some(ratio) => write!(f, "⚖️ streaming-append / row-insert throughput: {ratio:.2}x"),
            None => write!(f, "⚖️ streaming-append / row-insert throughput: n/a"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn the_one_where_an_empty_run_reports_zeros_instead_of_dividing_by_them() {
        let aggregator = PerformanceAggregator::new();
        let report = aggregator.report();
        assert_eq!(report.row_insert.min_batch_time_ms, 0);
        assert_eq!(report.row_insert.throughput(), 0.0);
        assert_eq!(report.streaming_append.average_batch_time_ms(), 0.0);
        assert!(report.ratio.is_none());
        let rendered = report.to_string();
        assert!(rendered.contains("row-insert"));
        assert!(rendered.contains("n/a"));
    }

    #[test]
    fn the_one_where_throughput_and_ratio_do_the_math() {
        let aggregator = PerformanceAggregator::new();
        aggregator.record(StrategyId::RowInsert, 500, 1_000);
        aggregator.record(StrategyId::RowInsert, 500, 1_000);
        aggregator.record(StrategyId::StreamingAppend, 1_000, 500);

        let report = aggregator.report();
        assert_eq!(report.row_insert.throughput(), 500.0);
        assert_eq!(report.row_insert.average_batch_time_ms(), 1_000.0);
        assert_eq!(report.streaming_append.throughput(), 2_000.0);
        assert_eq!(report.ratio, Some(4.0));
        assert!(report.to_string().contains("4.00x"));
    }

    #[test]
    fn the_one_where_a_zero_millisecond_batch_does_not_divide_by_zero() {
        let aggregator = PerformanceAggregator::new();
        aggregator.record(StrategyId::RowInsert, 10, 0);
        let snapshot = aggregator.snapshot(StrategyId::RowInsert);
        assert_eq!(snapshot.throughput(), 0.0);
        assert_eq!(snapshot.min_batch_time_ms, 0);
        assert_eq!(snapshot.batches, 1);
        assert!(aggregator.report().ratio.is_none());
    }

    #[test]
    fn the_one_where_failures_and_retries_land_in_their_own_columns() {
        let aggregator = PerformanceAggregator::new();
        aggregator.record_failures(StrategyId::StreamingAppend, 3);
        aggregator.record_retries(StrategyId::StreamingAppend, 2);
        let snapshot = aggregator.snapshot(StrategyId::StreamingAppend);
        assert_eq!(snapshot.failed_records, 3);
        assert_eq!(snapshot.retries, 2);
        assert_eq!(aggregator.snapshot(StrategyId::RowInsert).failed_records, 0);
    }

    #[test]
    fn the_one_where_eight_threads_hammer_the_counters_and_nothing_is_lost() {
        let aggregator = Arc::new(PerformanceAggregator::new());
        let threads: Vec<_> = (0..8u64)
            .map(|t| {
                let aggregator = Arc::clone(&aggregator);
                std::thread::spawn(move || {
                    for i in 0..1_000u64 {
                        // -- 🎲 durations 1..=8000 spread over all threads, each used once
                        aggregator.record(StrategyId::RowInsert, 2, t * 1_000 + i + 1);
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().expect("💀 recorder thread panicked");
        }

        let snapshot = aggregator.snapshot(StrategyId::RowInsert);
        assert_eq!(snapshot.batches, 8_000);
        assert_eq!(snapshot.total_records, 16_000);
        assert_eq!(snapshot.total_time_ms, (1..=8_000u64).sum::<u64>());
        assert_eq!(snapshot.min_batch_time_ms, 1);
        assert_eq!(snapshot.max_batch_time_ms, 8_000);
    }

    #[test]
    fn the_one_where_big_numbers_get_their_commas() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1_000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }
}
