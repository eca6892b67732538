use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stores (configuration snapshot + conversation history)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// JSON snapshot of personalities, personas, templates and overrides.
    /// `None` boots with an empty in-memory repository.
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,
    /// Directory holding one JSONL history file per (channel, personality).
    #[serde(default = "d_history_dir")]
    pub history_dir: PathBuf,
    /// Conversations held in the history cache; least recently used go first.
    #[serde(default = "d_history_cache_conversations")]
    pub history_cache_conversations: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            snapshot_path: None,
            history_dir: d_history_dir(),
            history_cache_conversations: d_history_cache_conversations(),
        }
    }
}

fn d_history_dir() -> PathBuf {
    PathBuf::from("./data/history")
}

fn d_history_cache_conversations() -> usize {
    256
}
