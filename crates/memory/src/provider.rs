//! The `VectorMemoryProvider` trait covers every long-term memory backend
//! (REST vector store, in-process store, test doubles).

use async_trait::async_trait;
use ch_domain::error::Result;

use crate::types::{IngestResponse, MemoryHit, MemoryIngestRequest, MemorySearchRequest};

#[async_trait]
pub trait VectorMemoryProvider: Send + Sync {
    /// Semantic search (POST /api/memories/search).
    async fn search(&self, req: MemorySearchRequest) -> Result<Vec<MemoryHit>>;

    /// Store one snippet (POST /api/memories).
    async fn ingest(&self, req: MemoryIngestRequest) -> Result<IngestResponse>;

    /// Health check (GET /health).
    async fn health(&self) -> Result<serde_json::Value>;
}
