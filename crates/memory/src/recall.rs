//! Memory recall for prompt assembly.
//!
//! Queries the vector store for snippets relevant to the incoming message,
//! scoped to the conversation's participants, and applies the temporal
//! buffer: anything written after `now - buffer` is dropped because it may
//! duplicate turns already present in the short-term history window.
//!
//! Recall never fails the caller. Errors and timeouts produce an empty,
//! `degraded` outcome and a `MemoryDegraded` trace event.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use ch_domain::config::MemoryConfig;
use ch_domain::model::MemorySearchSettings;
use ch_domain::trace::TraceEvent;

use crate::provider::VectorMemoryProvider;
use crate::types::{MemoryHit, MemorySearchRequest};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecallOutcome {
    /// Highest score first.
    pub snippets: Vec<MemoryHit>,
    /// True when the store could not be queried.
    pub degraded: bool,
}

impl RecallOutcome {
    fn degraded() -> Self {
        Self {
            snippets: Vec::new(),
            degraded: true,
        }
    }
}

pub struct MemoryRecallService {
    /// `None` when long-term memory is disabled.
    provider: Option<Arc<dyn VectorMemoryProvider>>,
    buffer: Duration,
    timeout: Duration,
}

impl MemoryRecallService {
    pub fn new(provider: Option<Arc<dyn VectorMemoryProvider>>, buffer: Duration, timeout: Duration) -> Self {
        Self {
            provider,
            buffer,
            timeout,
        }
    }

    pub fn from_config(provider: Option<Arc<dyn VectorMemoryProvider>>, cfg: &MemoryConfig) -> Self {
        let provider = if cfg.enabled { provider } else { None };
        Self::new(provider, cfg.temporal_buffer(), cfg.recall_timeout())
    }

    pub fn is_enabled(&self) -> bool {
        self.provider.is_some()
    }

    /// Records stamped strictly after this instant are excluded.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let buffer = chrono::Duration::from_std(self.buffer).unwrap_or(chrono::Duration::zero());
        now - buffer
    }

    pub async fn recall(
        &self,
        query: &str,
        participants: &[String],
        now: DateTime<Utc>,
        settings: &MemorySearchSettings,
    ) -> RecallOutcome {
        let Some(provider) = &self.provider else {
            return RecallOutcome::default();
        };
        if query.trim().is_empty() || participants.is_empty() || settings.result_limit == 0 {
            return RecallOutcome::default();
        }

        let cutoff = self.cutoff(now);
        let req = MemorySearchRequest {
            query: query.to_owned(),
            persona_ids: participants.to_vec(),
            exclude_newer_than: cutoff,
            score_threshold: settings.score_threshold,
            limit: settings.result_limit,
        };

        let start = Instant::now();
        let hits = match tokio::time::timeout(self.timeout, provider.search(req)).await {
            Ok(Ok(hits)) => hits,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "memory recall failed; continuing without memory");
                TraceEvent::MemoryDegraded { reason: e.to_string() }.emit();
                return RecallOutcome::degraded();
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    "memory recall timed out; continuing without memory"
                );
                TraceEvent::MemoryDegraded {
                    reason: format!("timed out after {}ms", self.timeout.as_millis()),
                }
                .emit();
                return RecallOutcome::degraded();
            }
        };

        // The store's own filtering is not trusted; every bound is re-applied.
        let candidates = hits.len();
        let mut excluded_recent = 0;
        let mut below_threshold = 0;
        let mut snippets: Vec<MemoryHit> = Vec::with_capacity(candidates);
        for hit in hits {
            if hit.timestamp > cutoff {
                excluded_recent += 1;
            } else if hit.score < settings.score_threshold {
                below_threshold += 1;
            } else if participants.contains(&hit.persona_id) {
                snippets.push(hit);
            }
        }
        snippets.sort_by(|a, b| b.score.total_cmp(&a.score));
        snippets.truncate(settings.result_limit);

        TraceEvent::MemoryRecall {
            participants: participants.len(),
            candidates,
            excluded_recent,
            below_threshold,
            returned: snippets.len(),
            duration_ms: start.elapsed().as_millis() as u64,
        }
        .emit();

        RecallOutcome {
            snippets,
            degraded: false,
        }
    }
}
