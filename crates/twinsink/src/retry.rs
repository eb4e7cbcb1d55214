//! # 🔄 THE RETRY EXECUTOR
//!
//! 🎬 COLD OPEN — INT. FLUSH WORKER — ATTEMPT 3 OF 4
//!
//! The batch went out. Two rows came back with `backendError` scrawled on them.
//! The executor does not panic. It has done this before. It waits 200ms, sends
//! only those two rows, and this time nobody complains. It writes "10 succeeded"
//! in the ledger and goes back to sleep.
//!
//! Per batch the loop is `ATTEMPT(n) → SUCCESS | PARTIAL_FAILURE | FATAL_FAILURE`:
//! - a failure is transient if its reason is a known transient code, or if its
//!   message says something like "timed out"; everything else is fatal
//! - retriable items are re-sent after `min(100 * 2^n, cap)` ms, at most
//!   `max_retry_attempts` times
//! - fatal items, exhausted items, and conversion rejects are logged with id,
//!   reason and message, then dropped
//!
//! ⚠️ Shutdown wins over patience: once the shutdown watch flips, no new backoff
//! starts, and a backoff already in progress ends early. Its attempt still runs.
//!
//! 🦆

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, error, warn};

use crate::common::{Batch, Message, SinkFailure, StrategyId};
use crate::strategies::SinkStrategy;

/// 🔤 Transient error codes, matched against the failure's reason after it is
/// lowercased and stripped to alphanumerics.
const RETRIABLE_CODES: &[&str] = &[
    "resourceexhausted",
    "unavailable",
    "aborted",
    "deadlineexceeded",
    "internal",
    "timeout",
    "timedout",
    "connectionreset",
    "backenderror",
    "ratelimitexceeded",
    "stopped",
];

/// 🗣️ Transient phrases, matched against the free-text message after it is
/// lowercased with every run of punctuation collapsed to one space. Field names
/// in a schema error never look like these.
const RETRIABLE_PHRASES: &[&str] = &[
    "timeout",
    "timed out",
    "temporarily unavailable",
    "connection reset",
    "deadline exceeded",
];

const BASE_BACKOFF_MS: u64 = 100;

/// 🎛️ How hard to try before giving up on an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retry_attempts: u32,
    pub backoff_cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retry_attempts: 3,
            backoff_cap: Duration::from_millis(1_000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retry_attempts: u32, backoff_cap_ms: u64) -> Self {
        Self {
            max_retry_attempts,
            backoff_cap: Duration::from_millis(backoff_cap_ms),
        }
    }

    /// ⏳ Delay before retry number `retry` (1-based): `min(100 * 2^retry, cap)` ms.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u64.checked_shl(retry).unwrap_or(u64::MAX);
        let delay = Duration::from_millis(BASE_BACKOFF_MS.saturating_mul(factor));
        delay.min(self.backoff_cap)
    }

    /// 🔍 Does this failure look like weather rather than a verdict?
    ///
    /// The reason is a code and is checked against the code list. The message is
    /// prose and only counts if it contains one of the transient phrases.
    pub fn is_retriable(&self, failure: &SinkFailure) -> bool {
        let code: String = failure
            .reason
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .map(|c| c.to_ascii_lowercase())
            .collect();
        if RETRIABLE_CODES.iter().any(|marker| code.contains(marker)) {
            return true;
        }
        let prose = failure
            .message
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|word| !word.is_empty())
            .map(str::to_ascii_lowercase)
            .collect::<Vec<_>>()
            .join(" ");
        RETRIABLE_PHRASES.iter().any(|phrase| prose.contains(phrase))
    }
}

/// 📋 The final word on one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushReport {
    pub strategy: StrategyId,
    pub batch_size: usize,
    pub succeeded: usize,
    pub permanently_failed: usize,
    /// 🔢 Calls made to the strategy. `attempts - 1` of them were retries.
    pub attempts: u32,
    pub duration: Duration,
}

impl FlushReport {
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }

    /// ⏱️ Wall time in whole milliseconds, the unit the aggregator speaks.
    pub fn duration_ms(&self) -> u64 {
        u64::try_from(self.duration.as_millis()).unwrap_or(u64::MAX)
    }
}

/// 🔄 Runs one batch to completion against one strategy.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    shutdown: watch::Receiver<bool>,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy, shutdown: watch::Receiver<bool>) -> Self {
        Self { policy, shutdown }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// 🚀 Attempt, classify, back off, re-send the retriable subset, repeat.
    ///
    /// Never fails: every item ends up either written or logged as dropped, and
    /// the report says how many of each.
    pub async fn execute<S>(&mut self, strategy: &mut S, batch: Batch) -> FlushReport
    where
        S: SinkStrategy + ?Sized,
    {
        let started = Instant::now();
        let strategy_id = strategy.id();
        let batch_size = batch.len();
        let mut permanently_failed = 0usize;
        let mut attempts = 0u32;
        let mut retry = 0u32;

        // -- 🗺️ positions in `batch` of the messages going out on this attempt
        let mut pending: Vec<usize> = (0..batch_size).collect();

        while !pending.is_empty() {
            let slice: Vec<Arc<Message>> = pending
                .iter()
                .map(|&i| Arc::clone(&batch.messages[i]))
                .collect();
            attempts += 1;
            let outcome = strategy.write(&slice).await;
            debug!(
                "🔄 {} attempt {}: {} sent, {} ok, {} failed",
                strategy_id, attempts, outcome.attempted, outcome.succeeded, outcome.failed
            );

            for (&i, reason) in &outcome.rejected {
                error!(
                    "💀 {} dropped message '{}': conversion failed: {}",
                    strategy_id, slice[i].id, reason
                );
                permanently_failed += 1;
            }

            let mut retriable: Vec<(usize, SinkFailure)> = Vec::new();
            for (&i, failure) in &outcome.failures {
                if self.policy.is_retriable(failure) {
                    retriable.push((pending[i], failure.clone()));
                } else {
                    error!(
                        "💀 {} dropped message '{}' with a fatal error {}: {}",
                        strategy_id, slice[i].id, failure.reason, failure.message
                    );
                    permanently_failed += 1;
                }
            }
            if retriable.is_empty() {
                break;
            }

            let out_of_retries = retry >= self.policy.max_retry_attempts;
            if out_of_retries || self.shutting_down() {
                let why = if out_of_retries {
                    "retries exhausted"
                } else {
                    "shutting down"
                };
                for (i, failure) in &retriable {
                    error!(
                        "💀 {} dropped message '{}' ({}) after {} attempts, last error {}: {}",
                        strategy_id, batch.messages[*i].id, why, attempts, failure.reason, failure.message
                    );
                }
                permanently_failed += retriable.len();
                break;
            }

            retry += 1;
            let delay = self.policy.backoff(retry);
            warn!(
                "⚠️ {} retrying {} of {} messages in {:?} (retry {}/{})",
                strategy_id,
                retriable.len(),
                batch_size,
                delay,
                retry,
                self.policy.max_retry_attempts
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                Ok(()) = self.shutdown.changed() => {
                    debug!("🛑 {} backoff cut short by shutdown; one last attempt", strategy_id);
                }
            }
            pending = retriable.into_iter().map(|(i, _)| i).collect();
        }

        FlushReport {
            strategy: strategy_id,
            batch_size,
            succeeded: batch_size - permanently_failed,
            permanently_failed,
            attempts,
            duration: started.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{
        AppendBackend, ErrorProto, InMemoryAppendClient, InMemoryRowInsertClient, InsertResponse,
        RowInsertBackend, RowInsertError, SinkError,
    };
    use crate::strategies::{RowInsertStrategy, StreamingAppendStrategy};

    fn batch(n: usize) -> Batch {
        Batch::new(
            (0..n)
                .map(|i| Arc::new(Message::new(format!("m-{i}"), format!("body {i}"), "t", 0)))
                .collect(),
        )
    }

    fn executor(max: u32) -> (watch::Sender<bool>, RetryExecutor) {
        let (tx, rx) = watch::channel(false);
        (tx, RetryExecutor::new(RetryPolicy::new(max, 1_000), rx))
    }

    fn row_error(index: usize, reason: &str) -> RowInsertError {
        RowInsertError {
            index,
            errors: vec![ErrorProto {
                reason: reason.into(),
                message: String::new(),
            }],
        }
    }

    #[test]
    fn the_one_where_backoff_grows_politely_and_then_hits_the_ceiling() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(policy.backoff(3), Duration::from_millis(800));
        assert_eq!(policy.backoff(4), Duration::from_millis(1_000));
        let mut previous = Duration::ZERO;
        for n in 1..80 {
            let delay = policy.backoff(n);
            assert!(delay >= previous, "backoff shrank at {n}");
            assert!(delay <= policy.backoff_cap);
            previous = delay;
        }
    }

    #[test]
    fn the_one_where_the_classifier_knows_weather_from_verdicts() {
        let policy = RetryPolicy::default();
        for (reason, message) in [
            ("backendError", ""),
            ("rateLimitExceeded", "slow down"),
            ("RESOURCE_EXHAUSTED", "quota"),
            ("Service Unavailable", ""),
            ("transport", "error sending request: connection reset by peer"),
            ("timeout", "operation timed out"),
            ("stopped", ""),
            ("internalError", ""),
            ("DEADLINE_EXCEEDED", ""),
            ("Bad Request", "backend is temporarily unavailable, please retry"),
            ("transport", "deadline exceeded while waiting for headers"),
        ] {
            assert!(
                policy.is_retriable(&SinkFailure::new(reason, message)),
                "{reason} should be retriable"
            );
        }
        for (reason, message) in [
            ("invalid", "no such field: colour"),
            ("Bad Request", "nope"),
            ("decode", "expected value at line 1"),
            ("PERMISSION_DENIED", "who are you"),
            ("invalid", "no such field: internal_id."),
            ("invalid", "field 'backend_error_count' must be an integer"),
            ("Forbidden", "table is stopped_events_archive, writes not allowed"),
        ] {
            assert!(
                !policy.is_retriable(&SinkFailure::new(reason, message)),
                "{reason} should be fatal"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_a_hopeless_sink_gets_exactly_max_plus_one_calls() {
        let client = InMemoryRowInsertClient::default()
            .with_responder(|_, _| Err(SinkError::transport("unavailable", "connection refused")));
        let mut strategy = RowInsertStrategy::new(RowInsertBackend::InMemory(client.clone()));
        let (_tx, mut executor) = executor(3);

        let report = executor.execute(&mut strategy, batch(5)).await;
        assert_eq!(client.call_count().await, 4);
        assert_eq!(report.attempts, 4);
        assert_eq!(report.retries(), 3);
        assert_eq!(report.permanently_failed, 5);
        assert_eq!(report.succeeded, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_only_rows_two_and_five_get_a_second_chance() {
        let client = InMemoryRowInsertClient::default().with_responder(|call, _| {
            Ok(match call {
                0 => InsertResponse {
                    insert_errors: vec![row_error(2, "backendError"), row_error(5, "stopped")],
                },
                _ => InsertResponse::default(),
            })
        });
        let mut strategy = RowInsertStrategy::new(RowInsertBackend::InMemory(client.clone()));
        let (_tx, mut executor) = executor(3);

        let report = executor.execute(&mut strategy, batch(10)).await;
        let calls = client.calls().await;
        assert_eq!(calls.len(), 2);
        let second: Vec<&str> = calls[1].iter().map(|r| r.insert_id.as_str()).collect();
        assert_eq!(second, vec!["m-2", "m-5"]);
        assert_eq!(report.succeeded, 10);
        assert_eq!(report.permanently_failed, 0);
        assert_eq!(report.attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_retry_indices_map_back_through_two_rounds() {
        // 🧪 round 0 fails rows 1 and 3; round 1 (carrying m-1, m-3) fails its row 1 → m-3
        let client = InMemoryRowInsertClient::default().with_responder(|call, _| {
            Ok(match call {
                0 => InsertResponse {
                    insert_errors: vec![row_error(1, "backendError"), row_error(3, "backendError")],
                },
                1 => InsertResponse {
                    insert_errors: vec![row_error(1, "backendError")],
                },
                _ => InsertResponse::default(),
            })
        });
        let mut strategy = RowInsertStrategy::new(RowInsertBackend::InMemory(client.clone()));
        let (_tx, mut executor) = executor(3);

        let report = executor.execute(&mut strategy, batch(4)).await;
        let calls = client.calls().await;
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[2].len(), 1);
        assert_eq!(calls[2][0].insert_id, "m-3");
        assert_eq!(report.succeeded, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_a_fatal_error_is_dropped_without_a_second_look() {
        let client = InMemoryRowInsertClient::default().with_responder(|_, _| {
            Ok(InsertResponse {
                insert_errors: vec![row_error(0, "invalid")],
            })
        });
        let mut strategy = RowInsertStrategy::new(RowInsertBackend::InMemory(client.clone()));
        let (_tx, mut executor) = executor(3);

        let report = executor.execute(&mut strategy, batch(3)).await;
        assert_eq!(client.call_count().await, 1);
        assert_eq!(report.permanently_failed, 1);
        assert_eq!(report.succeeded, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_conversion_rejects_never_ride_the_retry_bus() {
        let client = InMemoryRowInsertClient::default().with_responder(|call, _| match call {
            0 => Err(SinkError::api(503, "UNAVAILABLE", "later")),
            _ => Ok(InsertResponse::default()),
        });
        let mut strategy = RowInsertStrategy::new(RowInsertBackend::InMemory(client.clone()));
        let (_tx, mut executor) = executor(3);
        let mut messages = batch(3).messages;
        messages[1] = Arc::new(Message {
            id: "m-1".into(),
            ..Default::default()
        });

        let report = executor.execute(&mut strategy, Batch::new(messages)).await;
        let calls = client.calls().await;
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].len(), 2);
        assert_eq!(calls[1].len(), 2);
        assert_eq!(report.permanently_failed, 1);
        assert_eq!(report.succeeded, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_the_stream_retries_the_whole_batch_or_nothing() {
        let client = InMemoryAppendClient::default().with_responder(|call, _| match call {
            0 => Err(SinkError::api(429, "RESOURCE_EXHAUSTED", "quota")),
            _ => Ok(()),
        });
        let mut strategy = StreamingAppendStrategy::new(AppendBackend::InMemory(client.clone()));
        let (_tx, mut executor) = executor(3);

        let report = executor.execute(&mut strategy, batch(6)).await;
        let calls = client.calls().await;
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].len(), 6);
        assert_eq!(report.succeeded, 6);
        assert_eq!(client.committed_rows().await, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_shutdown_means_no_more_second_chances() {
        let client = InMemoryRowInsertClient::default()
            .with_responder(|_, _| Err(SinkError::transport("timeout", "timed out")));
        let mut strategy = RowInsertStrategy::new(RowInsertBackend::InMemory(client.clone()));
        let (tx, mut executor) = executor(3);
        tx.send(true).expect("💀 receiver is alive");

        let report = executor.execute(&mut strategy, batch(2)).await;
        assert_eq!(client.call_count().await, 1);
        assert_eq!(report.permanently_failed, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_shutdown_mid_backoff_still_gets_its_last_attempt() {
        let client = InMemoryRowInsertClient::default()
            .with_responder(|_, _| Err(SinkError::transport("timeout", "timed out")));
        let mut strategy = RowInsertStrategy::new(RowInsertBackend::InMemory(client.clone()));
        let (tx, rx) = watch::channel(false);
        // -- 🐌 a huge cap so the first backoff is 200ms and the shutdown lands inside it
        let mut executor = RetryExecutor::new(RetryPolicy::new(10, 60_000), rx);

        let handle = tokio::spawn(async move { executor.execute(&mut strategy, batch(2)).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).expect("💀 receiver is alive");

        let report = handle.await.expect("💀 executor task panicked");
        assert_eq!(client.call_count().await, 2);
        assert_eq!(report.attempts, 2);
        assert_eq!(report.permanently_failed, 2);
    }
}
