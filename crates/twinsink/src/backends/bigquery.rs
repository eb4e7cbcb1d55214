//! # 📡 THE ROW-INSERT BACKEND
//!
//! 🎬 COLD OPEN — INT. WAREHOUSE LOADING DOCK — 3:47 AM
//!
//! Rows arrive in a JSON envelope. The warehouse inspects every single one, like
//! a customs officer with nowhere to be. Most get waved through. Some get a note:
//! `backendError`, `invalid`, `stopped`. The note says which row, by index. We
//! keep the notes. The retry executor reads them in the morning.
//!
//! 🚀 This module speaks the warehouse's `tabledata.insertAll` REST dialect:
//! `POST {url}/projects/{project}/datasets/{dataset}/tables/{table}/insertAll`
//! with `{"rows":[{"insertId":..,"json":{..}}]}` and gets back `insertErrors`.
//!
//! ⚠️ Authentication is not our business. A pre-issued bearer token goes in the
//! config, goes in the header, and that's the whole relationship.
//!
//! 🦆

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::backends::common_config::CommonSinkConfig;
use crate::backends::{InsertResponse, RowInsertClient, SinkError, api_error};
use crate::transforms::InsertRow;

fn default_url() -> String {
    "https://bigquery.googleapis.com/bigquery/v2".to_string()
}

// -- ⏱️ 30s: bulk inserts can be meaty and we're not monsters
fn default_timeout_ms() -> u64 {
    30_000
}

/// 🔧 Where the warehouse lives and which table gets the rows.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct BigQueryInsertConfig {
    /// 📡 API root, without the `/projects/...` tail.
    #[serde(default = "default_url")]
    pub url: String,
    pub project: String,
    pub dataset: String,
    pub table: String,
    /// 🔒 Pre-issued bearer token. Optional, for emulators that don't care.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// 🚫 Ask the warehouse to insert the valid rows even if some are invalid.
    /// Off by default: invalid rows then "stop" their neighbours, which we retry.
    #[serde(default)]
    pub skip_invalid_rows: bool,
    #[serde(default)]
    pub ignore_unknown_values: bool,
    #[serde(flatten, default)]
    pub common_config: CommonSinkConfig,
}

impl BigQueryInsertConfig {
    fn insert_all_url(&self) -> String {
        format!(
            "{}/projects/{}/datasets/{}/tables/{}/insertAll",
            self.url.trim_end_matches('/'),
            self.project,
            self.dataset,
            self.table
        )
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InsertAllRequest<'a> {
    skip_invalid_rows: bool,
    ignore_unknown_values: bool,
    rows: &'a [InsertRow],
}

/// 📨 The real row-insert client. Holds one reused `reqwest::Client`.
#[derive(Debug)]
pub struct BigQueryInsertClient {
    client: reqwest::Client,
    config: BigQueryInsertConfig,
    endpoint: String,
}

impl BigQueryInsertClient {
    pub fn new(config: BigQueryInsertConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("💀 The HTTP client refused to be born. Probably TLS. It's always TLS.")?;
        let endpoint = config.insert_all_url();
        debug!("📡 row-insert client ready for {}", endpoint);
        Ok(Self {
            client,
            config,
            endpoint,
        })
    }
}

#[async_trait]
impl RowInsertClient for BigQueryInsertClient {
    async fn insert_rows(&mut self, rows: Vec<InsertRow>) -> Result<InsertResponse, SinkError> {
        let body = InsertAllRequest {
            skip_invalid_rows: self.config.skip_invalid_rows,
            ignore_unknown_values: self.config.ignore_unknown_values,
            rows: &rows,
        };
        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }
        let parsed: InsertResponse = response.json().await?;
        trace!(
            "🚀 insertAll landed: {} rows sent, {} rows complained",
            rows.len(),
            parsed.insert_errors.len()
        );
        Ok(parsed)
    }

    async fn close(&mut self) -> Result<()> {
        // -- 🗑️ the connection pool drops with the client. nothing to flush, we don't buffer.
        debug!("🗑️ row-insert client closing for {}", self.endpoint);
        Ok(())
    }
}
