//! 🔧 App Configuration — the sacred TOML-to-struct pipeline.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing." — every developer at 3am 🦆
//!
//! 🏗️ Powered by Figment: `TWINSINK_*` env vars first, then an optional TOML file
//! on top. Every runtime knob has a default, and both sinks default to the
//! in-memory doubles, so an empty config is a valid dry run.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use tracing::info;

use crate::backends::{
    BigQueryInsertConfig, CommonSinkConfig, HttpAppendConfig, InMemoryConfig,
};
use crate::retry::RetryPolicy;
use crate::sources::{FileSourceConfig, SyntheticSourceConfig};

fn default_flush_threshold() -> usize {
    500
}

fn default_flush_interval_ms() -> u64 {
    5_000
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_backoff_cap_ms() -> u64 {
    1_000
}

// -- 📊 once a minute, like a smoke alarm that only chirps good news
fn default_report_interval_ms() -> u64 {
    60_000
}

/// ⚙️ The knobs shared by both lanes.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// 📦 Pending count that triggers a flush, and the max messages per batch.
    /// `batch_size` is the name the old property files use.
    #[serde(default = "default_flush_threshold", alias = "batch_size")]
    pub flush_threshold: usize,
    /// ⏱️ Period of the straggler flush timer.
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
    #[serde(default = "default_report_interval_ms")]
    pub report_interval_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            flush_threshold: default_flush_threshold(),
            flush_interval_ms: default_flush_interval_ms(),
            max_retry_attempts: default_max_retry_attempts(),
            backoff_cap_ms: default_backoff_cap_ms(),
            report_interval_ms: default_report_interval_ms(),
        }
    }
}

impl RuntimeConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retry_attempts, self.backoff_cap_ms)
    }

    // -- ⚠️ tokio intervals panic on a zero period, so 0 quietly means 1ms
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms.max(1))
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms.max(1))
    }
}

/// 📨 Which row-insert client to build.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub enum RowInsertConfig {
    InMemory(InMemoryConfig),
    BigQuery(BigQueryInsertConfig),
}

impl Default for RowInsertConfig {
    fn default() -> Self {
        RowInsertConfig::InMemory(InMemoryConfig::default())
    }
}

impl RowInsertConfig {
    pub fn common_config(&self) -> &CommonSinkConfig {
        match self {
            RowInsertConfig::InMemory(c) => &c.common_config,
            RowInsertConfig::BigQuery(c) => &c.common_config,
        }
    }
}

/// 🌊 Which streaming-append client to build.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub enum AppendConfig {
    InMemory(InMemoryConfig),
    Http(HttpAppendConfig),
}

impl Default for AppendConfig {
    fn default() -> Self {
        AppendConfig::InMemory(InMemoryConfig::default())
    }
}

impl AppendConfig {
    pub fn common_config(&self) -> &CommonSinkConfig {
        match self {
            AppendConfig::InMemory(c) => &c.common_config,
            AppendConfig::Http(c) => &c.common_config,
        }
    }
}

/// 🚰 Where the messages come from when the CLI drives the writer.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub enum SourceConfig {
    Synthetic(SyntheticSourceConfig),
    File(FileSourceConfig),
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig::Synthetic(SyntheticSourceConfig::default())
    }
}

/// 📦 The AppConfig: one struct to rule them all, one struct to find them,
/// one struct to bring them all, and in the Figment bind them.
#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct AppConfig {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub row_insert: RowInsertConfig,
    #[serde(default)]
    pub streaming_append: AppendConfig,
    #[serde(default)]
    pub source: SourceConfig,
}

/// 🚀 Load the config — from a file, from env vars, or from the sheer power of hoping.
///
/// 🔧 Merges environment variables (`TWINSINK_*`, nested keys split on `__`, so
/// `TWINSINK_RUNTIME__FLUSH_THRESHOLD=250` sets `runtime.flush_threshold`) with an
/// optional TOML file. The file wins on conflicts.
///
/// 💀 Returns an error if config is unparseable. The message says which layer to blame.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {:#?}",
        config_file_name.unwrap_or(Path::new(""))
    );

    let config = Figment::new().merge(Env::prefixed("TWINSINK_").split("__"));

    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (TWINSINK_*). \
             The file exists in our hearts, but apparently not in a shape serde recognizes.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (TWINSINK_*). \
                 No file was provided, so this one's all on the environment. Classic."
            .to_string(),
    };

    config.extract().context(context_msg)
}
