//! 🚰 Sources — where the messages come from before they become everyone's problem.
//!
//! 🎬 *[a load generator clears its throat. a file full of JSON lines waits.]*
//!
//! The writer does not care who produces. The CLI needs *someone* to, so here are
//! two producers:
//! - [`SyntheticSource`]: makes up `message_count` messages on the spot. UUID ids,
//!   "Test message {i}" payloads, priorities cycling 0, 1, 2.
//! - [`FileSource`]: reads newline-delimited JSON messages from disk. Lines that
//!   don't parse are logged and skipped; one bad line does not end the run.
//!
//! 🦆

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::app_config::SourceConfig;
use crate::common::Message;

fn default_message_count() -> u64 {
    10_000
}

fn default_source_tag() -> String {
    "performance-test".to_string()
}

/// 🎲 How much fake traffic to make up, and what to call it.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct SyntheticSourceConfig {
    #[serde(default = "default_message_count")]
    pub message_count: u64,
    #[serde(default = "default_source_tag")]
    pub source_tag: String,
}

impl Default for SyntheticSourceConfig {
    fn default() -> Self {
        Self {
            message_count: default_message_count(),
            source_tag: default_source_tag(),
        }
    }
}

/// 📂 "It's just a file", said no sysadmin ever before the disk filled up.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct FileSourceConfig {
    pub file_name: String,
}

/// 🎯 Something that hands out messages until it runs dry.
#[async_trait]
pub trait Source: std::fmt::Debug + Send {
    /// `Ok(None)` means exhausted. Errors are for the source itself breaking, not
    /// for individual bad messages.
    async fn next_message(&mut self) -> Result<Option<Message>>;
}

/// 🎲 A load generator with a counter and no imagination.
#[derive(Debug)]
pub struct SyntheticSource {
    config: SyntheticSourceConfig,
    produced: u64,
}

impl SyntheticSource {
    pub fn new(config: SyntheticSourceConfig) -> Self {
        Self {
            config,
            produced: 0,
        }
    }
}

#[async_trait]
impl Source for SyntheticSource {
    async fn next_message(&mut self) -> Result<Option<Message>> {
        if self.produced >= self.config.message_count {
            return Ok(None);
        }
        let i = self.produced;
        self.produced += 1;
        Ok(Some(Message {
            id: Uuid::new_v4().to_string(),
            payload: Some(format!("Test message {i}")),
            timestamp: Some(Utc::now()),
            source: Some(self.config.source_tag.clone()),
            priority: Some((i % 3) as i64),
        }))
    }
}

/// 📂 Reads one JSON message per line.
#[derive(Debug)]
pub struct FileSource {
    lines: Lines<BufReader<File>>,
    file_name: String,
    line_number: u64,
    skipped: u64,
}

impl FileSource {
    pub async fn new(config: FileSourceConfig) -> Result<Self> {
        let file = File::open(&config.file_name).await.context(format!(
            "💀 The door to '{}' would not budge. It might not exist, or the permissions \
             might be wrong. Either way, the messages remain inside.",
            config.file_name
        ))?;
        Ok(Self {
            lines: BufReader::new(file).lines(),
            file_name: config.file_name,
            line_number: 0,
            skipped: 0,
        })
    }

    /// 🗑️ Lines that were not valid messages.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

#[async_trait]
impl Source for FileSource {
    async fn next_message(&mut self) -> Result<Option<Message>> {
        loop {
            let Some(line) = self
                .lines
                .next_line()
                .await
                .context(format!("💀 Reading '{}' failed mid-file", self.file_name))?
            else {
                debug!(
                    "🏁 '{}' exhausted after {} lines ({} skipped)",
                    self.file_name, self.line_number, self.skipped
                );
                return Ok(None);
            };
            self.line_number += 1;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<Message>(trimmed) {
                Ok(message) => return Ok(Some(message)),
                Err(err) => {
                    self.skipped += 1;
                    warn!(
                        "⚠️ skipping line {} of '{}': not a message ({})",
                        self.line_number, self.file_name, err
                    );
                }
            }
        }
    }
}

/// 🎭 The producers the CLI knows how to build.
#[derive(Debug)]
pub enum SourceBackend {
    Synthetic(SyntheticSource),
    File(FileSource),
}

impl SourceBackend {
    pub async fn from_config(config: &SourceConfig) -> Result<Self> {
        Ok(match config {
            SourceConfig::Synthetic(c) => Self::Synthetic(SyntheticSource::new(c.clone())),
            SourceConfig::File(c) => Self::File(FileSource::new(c.clone()).await?),
        })
    }
}

#[async_trait]
impl Source for SourceBackend {
    async fn next_message(&mut self) -> Result<Option<Message>> {
        match self {
            SourceBackend::Synthetic(s) => s.next_message().await,
            SourceBackend::File(s) => s.next_message().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::io::Write;

    #[tokio::test]
    async fn the_one_where_the_load_generator_counts_to_five_and_stops() {
        let mut source = SyntheticSource::new(SyntheticSourceConfig {
            message_count: 5,
            source_tag: "bench".into(),
        });
        let mut messages = Vec::new();
        while let Some(message) = source.next_message().await.expect("💀 synthetic never fails") {
            messages.push(message);
        }
        assert_eq!(messages.len(), 5);
        assert_eq!(messages[4].payload.as_deref(), Some("Test message 4"));
        assert_eq!(
            messages.iter().map(|m| m.priority.unwrap_or(-1)).collect::<Vec<_>>(),
            vec![0, 1, 2, 0, 1]
        );
        assert!(messages.iter().all(|m| m.source.as_deref() == Some("bench")));
        let ids: HashSet<_> = messages.iter().map(|m| m.id.clone()).collect();
        assert_eq!(ids.len(), 5);
        assert!(source.next_message().await.expect("💀 still fine").is_none());
    }

    #[tokio::test]
    async fn the_one_where_a_garbled_line_is_skipped_not_fatal() {
        let mut file = tempfile::NamedTempFile::new().expect("💀 temp file");
        writeln!(file, r#"{{"id":"a","message":"first"}}"#).expect("💀 write");
        writeln!(file, "this is not json").expect("💀 write");
        writeln!(file).expect("💀 write");
        writeln!(file, r#"{{"id":"b","message":"second","priority":2}}"#).expect("💀 write");

        let mut source = FileSource::new(FileSourceConfig {
            file_name: file.path().display().to_string(),
        })
        .await
        .expect("💀 file opens");

        let first = source.next_message().await.expect("💀 read").expect("💀 first");
        let second = source.next_message().await.expect("💀 read").expect("💀 second");
        assert_eq!(first.id, "a");
        assert_eq!(second.id, "b");
        assert_eq!(second.priority, Some(2));
        assert!(source.next_message().await.expect("💀 read").is_none());
        assert_eq!(source.skipped(), 1);
    }

    #[tokio::test]
    async fn the_one_where_the_file_simply_is_not_there() {
        let err = SourceBackend::from_config(&SourceConfig::File(FileSourceConfig {
            file_name: "/definitely/not/here.ndjson".into(),
        }))
        .await
        .expect_err("💀 missing file should fail");
        assert!(format!("{err:#}").contains("would not budge"));
    }
}
