//! 🌊 The streaming-append backend, over plain HTTP + JSON.
//!
//! One POST per batch: `{"rows":[...]}` in, `{"offset": n}` out. All or nothing.
//! The sink either takes the whole batch and tells you where in the stream it
//! landed, or it takes none of it and tells you why, Google-error-body style.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::backends::common_config::CommonSinkConfig;
use crate::backends::{AppendClient, AppendResponse, SinkError, api_error};
use crate::transforms::WarehouseRow;

fn default_timeout_ms() -> u64 {
    30_000
}

/// 🔧 Where the append stream lives.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct HttpAppendConfig {
    /// 📡 Full URL of the append endpoint.
    pub url: String,
    /// 🔒 Pre-issued bearer token, if the endpoint wants one.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(flatten, default)]
    pub common_config: CommonSinkConfig,
}

#[derive(Debug, Serialize)]
struct AppendRequest<'a> {
    rows: &'a [WarehouseRow],
}

#[derive(Debug)]
pub struct HttpAppendClient {
    client: reqwest::Client,
    config: HttpAppendConfig,
}

impl HttpAppendClient {
    pub fn new(config: HttpAppendConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("💀 The append client could not be built. The TLS stack sends its regrets.")?;
        debug!("📡 append client ready for {}", config.url);
        Ok(Self { client, config })
    }
}

#[async_trait]
impl AppendClient for HttpAppendClient {
    async fn append_batch(&mut self, rows: Vec<WarehouseRow>) -> Result<AppendResponse, SinkError> {
        let mut request = self
            .client
            .post(&self.config.url)
            .json(&AppendRequest { rows: &rows });
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }
        let parsed: AppendResponse = response.json().await?;
        trace!("🌊 appended {} rows at offset {}", rows.len(), parsed.offset);
        Ok(parsed)
    }

    async fn close(&mut self) -> Result<()> {
        debug!("🗑️ append client closing for {}", self.config.url);
        Ok(())
    }
}
