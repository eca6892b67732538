use std::time::Duration;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Long-term memory (vector store) connection + recall
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// When false, recall always returns nothing and write-back is skipped.
    #[serde(default = "d_true")]
    pub enabled: bool,
    #[serde(default)]
    pub backend: MemoryBackend,
    #[serde(default = "d_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "d_8000")]
    pub timeout_ms: u64,
    #[serde(default = "d_3")]
    pub max_retries: u32,
    /// Records newer than `now - temporal_buffer_ms` are excluded from recall.
    #[serde(default = "d_10000")]
    pub temporal_buffer_ms: u64,
    /// Upper bound on one recall, retries included.
    #[serde(default = "d_5000")]
    pub recall_timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemoryBackend {
    /// Remote vector store over REST.
    #[default]
    Rest,
    /// Process-local lexical store; nothing survives a restart.
    InMemory,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: MemoryBackend::Rest,
            base_url: d_url(),
            api_key: None,
            timeout_ms: d_8000(),
            max_retries: d_3(),
            temporal_buffer_ms: d_10000(),
            recall_timeout_ms: d_5000(),
        }
    }
}

impl MemoryConfig {
    pub fn temporal_buffer(&self) -> Duration {
        Duration::from_millis(self.temporal_buffer_ms)
    }

    pub fn recall_timeout(&self) -> Duration {
        Duration::from_millis(self.recall_timeout_ms)
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_true() -> bool {
    true
}
fn d_url() -> String {
    "http://localhost:5000".into()
}
fn d_8000() -> u64 {
    8000
}
fn d_3() -> u32 {
    3
}
fn d_10000() -> u64 {
    10_000
}
fn d_5000() -> u64 {
    5_000
}
