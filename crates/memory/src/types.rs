//! Wire DTOs for the vector store API.
//!
//! Field names are `camelCase` on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Search
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// POST /api/memories/search — request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySearchRequest {
    pub query: String,
    /// Only snippets owned by these personas are eligible.
    pub persona_ids: Vec<String>,
    /// Snippets stamped after this instant are excluded.
    pub exclude_newer_than: DateTime<Utc>,
    pub score_threshold: f32,
    pub limit: usize,
}

/// POST /api/memories/search — response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySearchResponse {
    #[serde(default)]
    pub memories: Vec<MemoryHit>,
}

/// One recalled snippet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryHit {
    #[serde(default)]
    pub id: Option<String>,
    pub text: String,
    pub score: f32,
    pub timestamp: DateTime<Utc>,
    pub persona_id: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Ingest
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// POST /api/memories — request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryIngestRequest {
    pub text: String,
    pub persona_id: String,
    pub personality_id: String,
    pub channel_id: String,
    pub timestamp: DateTime<Utc>,
}

/// POST /api/memories — response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestResponse {
    pub id: String,
}
