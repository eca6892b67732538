use serde::Serialize;

/// Structured trace events emitted across all Chorus crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    JobReserved {
        fingerprint: String,
        job_id: String,
        created: bool,
    },
    JobEnqueued {
        job_id: String,
        channel_id: String,
        personality_id: String,
    },
    DuplicateSuppressed {
        fingerprint: String,
        job_id: String,
    },
    JobTransition {
        job_id: String,
        from: String,
        to: String,
    },
    JobSkipped {
        job_id: String,
        status: String,
    },
    JobTimedOut {
        job_id: String,
        waited_ms: u64,
    },
    LateCompletionIgnored {
        job_id: String,
        status: String,
    },
    ContextBuilt {
        job_id: String,
        participants: usize,
        history_entries: usize,
        memory_snippets: usize,
        memory_degraded: bool,
        total_chars: usize,
    },
    MemoryRecall {
        participants: usize,
        candidates: usize,
        excluded_recent: usize,
        below_threshold: usize,
        returned: usize,
        duration_ms: u64,
    },
    MemoryDegraded {
        reason: String,
    },
    VectorStoreCall {
        endpoint: String,
        status: u16,
        duration_ms: u64,
    },
    LlmRequest {
        provider: String,
        model: String,
        duration_ms: u64,
        prompt_tokens: Option<u32>,
        completion_tokens: Option<u32>,
    },
    HistoryAppend {
        channel_id: String,
        personality_id: String,
        lines: usize,
    },
    IdentityResolved {
        raw_sender_id: String,
        user_id: String,
        proxied: bool,
    },
    CacheSwept {
        cache: String,
        evicted: usize,
        remaining: usize,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "ch_event");
    }
}
