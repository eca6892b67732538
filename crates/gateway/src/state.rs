use std::sync::Arc;

use ch_domain::config::Config;
use ch_jobs::{DedupCache, JobQueue, JobStore};
use ch_memory::VectorMemoryProvider;
use ch_providers::ProviderRegistry;
use ch_worker::JobProcessor;

use crate::orchestrator::GenerationOrchestrator;

/// Shared application state passed to all API handlers.
///
/// Gateway and worker pool run in one process and share the dedup cache,
/// queue and job store through this struct; neither side reaches into the
/// other except through those three seams.
#[derive(Clone)]
pub struct AppState {
    // ── Core services ─────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub orchestrator: Arc<GenerationOrchestrator>,
    /// `None` when long-term memory is disabled.
    pub memory: Option<Arc<dyn VectorMemoryProvider>>,
    pub llm: Arc<ProviderRegistry>,

    // ── Job machinery ─────────────────────────────────────────────────
    pub dedup: Arc<dyn DedupCache>,
    pub jobs: Arc<dyn JobStore>,
    pub queue: Arc<dyn JobQueue>,
    pub processor: Arc<JobProcessor>,

    // ── Security (startup-computed) ───────────────────────────────────
    /// SHA-256 hash of the API bearer token (read once at startup).
    /// `None` = dev mode (no auth enforced).
    pub api_token_hash: Option<Vec<u8>>,
}
