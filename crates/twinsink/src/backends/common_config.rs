// ai
//! 🎬 *[every sink config walks in with the same little clipboard.]*
//!
//! 📦 **Common Sink Config** — the knobs every sink backend config embeds
//! (flattened, so they sit right next to the backend's own keys in TOML).
//!
//! 🧠 Knowledge graph:
//! - Embedded in `InMemoryConfig`, `BigQueryInsertConfig`, `HttpAppendConfig`
//! - `flush_threshold`: per-lane override of `runtime.flush_threshold`. Each lane
//!   has its own buffer and its own threshold; this is how you make them differ.
//! - Lives in `backends` (not `app_config`) to dodge the circular import
//!   `app_config` → `backends` → `app_config`. The module system has opinions. 🦆

use serde::Deserialize;

/// 🚰 Shared configuration embedded by every sink backend config.
#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct CommonSinkConfig {
    /// 📦 Pending-count at which this lane flushes. `None` → use the runtime default.
    #[serde(default)]
    pub flush_threshold: Option<usize>,
}

impl CommonSinkConfig {
    /// 🎯 Resolve the effective threshold. Zero would mean "flush on every message
    /// forever", which is a choice, but not one we let config typos make for you.
    pub fn flush_threshold_or(&self, runtime_default: usize) -> usize {
        self.flush_threshold
            .filter(|threshold| *threshold > 0)
            .unwrap_or(runtime_default)
            .max(1)
    }
}
