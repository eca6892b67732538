//! Process-local vector memory with lexical-overlap scoring.
//!
//! Good enough for development and tests; scores are the Jaccard overlap
//! of lower-cased word sets, so identical text scores 1.0.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use ch_domain::error::Result;

use crate::provider::VectorMemoryProvider;
use crate::types::{IngestResponse, MemoryHit, MemoryIngestRequest, MemorySearchRequest};

#[derive(Debug, Clone)]
struct StoredMemory {
    id: String,
    text: String,
    persona_id: String,
    timestamp: DateTime<Utc>,
}

#[derive(Default)]
pub struct InMemoryVectorStore {
    records: RwLock<Vec<StoredMemory>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record with an explicit timestamp. Returns its id.
    pub fn insert(&self, text: &str, persona_id: &str, timestamp: DateTime<Utc>) -> String {
        let id = Uuid::new_v4().to_string();
        self.records.write().push(StoredMemory {
            id: id.clone(),
            text: text.to_owned(),
            persona_id: persona_id.to_owned(),
            timestamp,
        });
        id
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

fn words(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

fn overlap(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let inter = a.intersection(b).count() as f32;
    let union = a.union(b).count() as f32;
    inter / union
}

#[async_trait]
impl VectorMemoryProvider for InMemoryVectorStore {
    async fn search(&self, req: MemorySearchRequest) -> Result<Vec<MemoryHit>> {
        let query = words(&req.query);
        let records = self.records.read();

        let mut hits: Vec<MemoryHit> = records
            .iter()
            .filter(|r| req.persona_ids.contains(&r.persona_id))
            .filter(|r| r.timestamp <= req.exclude_newer_than)
            .map(|r| MemoryHit {
                id: Some(r.id.clone()),
                text: r.text.clone(),
                score: overlap(&query, &words(&r.text)),
                timestamp: r.timestamp,
                persona_id: r.persona_id.clone(),
            })
            .filter(|h| h.score >= req.score_threshold)
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(req.limit);
        Ok(hits)
    }

    async fn ingest(&self, req: MemoryIngestRequest) -> Result<IngestResponse> {
        let id = self.insert(&req.text, &req.persona_id, req.timestamp);
        Ok(IngestResponse { id })
    }

    async fn health(&self) -> Result<serde_json::Value> {
        Ok(serde_json::json!({
            "status": "ok",
            "backend": "in_memory",
            "records": self.len(),
        }))
    }
}
