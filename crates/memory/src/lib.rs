//! `ch-memory` — long-term memory for Chorus.
//!
//! Provides the [`VectorMemoryProvider`] trait over vector-store backends,
//! a REST implementation ([`RestVectorMemoryClient`]), a process-local
//! store ([`InMemoryVectorStore`]) and the [`MemoryRecallService`] that
//! prompt assembly queries.
//!
//! | `memory.backend` | Implementation            |
//! |------------------|---------------------------|
//! | `rest`           | `RestVectorMemoryClient`  |
//! | `inmemory`       | `InMemoryVectorStore`     |

pub mod in_memory;
pub mod provider;
pub mod recall;
pub mod rest;
pub mod types;

pub use in_memory::InMemoryVectorStore;
pub use provider::VectorMemoryProvider;
pub use recall::{MemoryRecallService, RecallOutcome};
pub use rest::{from_reqwest, RestVectorMemoryClient};
pub use types::{IngestResponse, MemoryHit, MemoryIngestRequest, MemorySearchRequest};

use std::sync::Arc;

use ch_domain::config::{MemoryBackend, MemoryConfig};
use ch_domain::error::Result;

/// Build the configured provider, or `None` when memory is disabled.
pub fn create_provider(cfg: &MemoryConfig) -> Result<Option<Arc<dyn VectorMemoryProvider>>> {
    if !cfg.enabled {
        tracing::info!("long-term memory disabled");
        return Ok(None);
    }
    let provider: Arc<dyn VectorMemoryProvider> = match cfg.backend {
        MemoryBackend::Rest => {
            tracing::info!(base_url = %cfg.base_url, "using REST vector memory");
            Arc::new(RestVectorMemoryClient::new(cfg)?)
        }
        MemoryBackend::InMemory => {
            tracing::info!("using in-memory vector memory (not persisted)");
            Arc::new(InMemoryVectorStore::new())
        }
    };
    Ok(Some(provider))
}
