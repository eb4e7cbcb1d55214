//! 📨 Row-insert strategy: one bulk insert per write, verdicts per row.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};

use crate::backends::{RowInsertBackend, RowInsertClient};
use crate::common::{Message, StrategyId, WriteOutcome};
use crate::strategies::SinkStrategy;
use crate::transforms::to_insert_row;

#[derive(Debug)]
pub struct RowInsertStrategy {
    client: RowInsertBackend,
}

impl RowInsertStrategy {
    pub fn new(client: RowInsertBackend) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SinkStrategy for RowInsertStrategy {
    fn id(&self) -> StrategyId {
        StrategyId::RowInsert
    }

    async fn write(&mut self, messages: &[Arc<Message>]) -> WriteOutcome {
        let now = Utc::now();
        let mut outcome = WriteOutcome {
            attempted: messages.len(),
            ..Default::default()
        };

        // -- 🗺️ sent_index[k] = position in `messages` of the k-th row on the wire
        let mut rows = Vec::with_capacity(messages.len());
        let mut sent_index = Vec::with_capacity(messages.len());
        for (i, message) in messages.iter().enumerate() {
            match to_insert_row(message, now) {
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

        let sent = rows.len();
        match self.client.insert_rows(rows).await {
            Ok(response) => {
                for row_error in response.insert_errors {
                    match sent_index.get(row_error.index) {
                        Some(&i) => {
                            outcome.failures.insert(i, row_error.to_failure());
                        }
                        None => warn!(
                            "⚠️ sink reported an error for row {} but only {} rows were sent; ignoring it",
                            row_error.index, sent
                        ),
                    }
                }
            }
            Err(err) => {
                // 💀 the whole call fell over: every row on the wire shares the blame
                let failure = err.to_failure();
                debug!("📨 row-insert call failed outright: {}", err);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{
        ErrorProto, InMemoryRowInsertClient, InsertResponse, RowInsertError, SinkError,
    };
    use crate::common::SinkFailure;

    fn messages(n: usize) -> Vec<Arc<Message>> {
        (0..n)
            .map(|i| Arc::new(Message::new(format!("m-{i}"), format!("body {i}"), "t", 1)))
            .collect()
    }

    fn row_error(index: usize, reason: &str) -> RowInsertError {
        RowInsertError {
            index,
            errors: vec![ErrorProto {
                reason: reason.into(),
                message: format!("{reason} happened"),
            }],
        }
    }

    #[tokio::test]
    async fn the_one_where_every_row_lands_and_nobody_complains() {
        let client = InMemoryRowInsertClient::default();
        let mut strategy = RowInsertStrategy::new(RowInsertBackend::InMemory(client.clone()));
        let outcome = strategy.write(&messages(4)).await;
        assert_eq!(outcome.attempted, 4);
        assert_eq!(outcome.succeeded, 4);
        assert!(outcome.is_success());
        assert_eq!(client.rows_seen().await, 4);
        assert_eq!(strategy.id(), StrategyId::RowInsert);
    }

    #[tokio::test]
    async fn the_one_where_rejected_rows_shift_the_wire_indices() {
        // 🧪 message 1 has no payload, so the wire carries [m-0, m-2, m-3]
        // and a sink error on wire row 1 must land on message 2
        let client = InMemoryRowInsertClient::default().with_responder(|_, rows| {
            assert_eq!(rows.len(), 3);
            Ok(InsertResponse {
                insert_errors: vec![row_error(1, "invalid")],
            })
        });
        let mut strategy = RowInsertStrategy::new(RowInsertBackend::InMemory(client));
        let mut batch = messages(4);
        batch[1] = Arc::new(Message {
            id: "m-1".into(),
            ..Default::default()
        });

        let outcome = strategy.write(&batch).await;
        assert_eq!(outcome.rejected.keys().copied().collect::<Vec<_>>(), vec![1]);
        assert_eq!(outcome.failures.keys().copied().collect::<Vec<_>>(), vec![2]);
        assert_eq!(outcome.failures[&2].reason, "invalid");
        assert_eq!(outcome.succeeded, 2);
        assert_eq!(outcome.failed, 2);
    }

    #[tokio::test]
    async fn the_one_where_a_call_level_error_blames_every_sent_row() {
        let client = InMemoryRowInsertClient::default()
            .with_responder(|_, _| Err(SinkError::transport("timeout", "operation timed out")));
        let mut strategy = RowInsertStrategy::new(RowInsertBackend::InMemory(client));
        let outcome = strategy.write(&messages(3)).await;
        assert_eq!(outcome.failures.len(), 3);
        assert_eq!(
            outcome.failures[&0],
            SinkFailure::new("timeout", "operation timed out")
        );
        assert_eq!(outcome.succeeded, 0);
    }

    #[tokio::test]
    async fn the_one_where_an_all_rejected_batch_never_bothers_the_network() {
        let client = InMemoryRowInsertClient::default();
        let mut strategy = RowInsertStrategy::new(RowInsertBackend::InMemory(client.clone()));
        let nameless = vec![Arc::new(Message::default()), Arc::new(Message::default())];
        let outcome = strategy.write(&nameless).await;
        assert_eq!(outcome.rejected.len(), 2);
        assert_eq!(client.call_count().await, 0);
    }

    #[tokio::test]
    async fn the_one_where_an_out_of_range_row_error_is_shrugged_off() {
        let client = InMemoryRowInsertClient::default().with_responder(|_, _| {
            Ok(InsertResponse {
                insert_errors: vec![row_error(99, "backendError")],
            })
        });
        let mut strategy = RowInsertStrategy::new(RowInsertBackend::InMemory(client));
        let outcome = strategy.write(&messages(2)).await;
        assert!(outcome.is_success());
    }
}
