use async_trait::async_trait;

use ch_domain::error::Result;
use ch_domain::model::{HistoryEntry, LlmSettings, Persona, Personality, SystemPrompt};

/// Read access to personalities, personas, templates and per-user overrides.
///
/// A missing override is `Ok(None)`; there are no sentinel rows. Overrides
/// are returned already joined to the record they point at.
#[async_trait]
pub trait ConfigRepository: Send + Sync {
    async fn personality(&self, id: &str) -> Result<Option<Personality>>;

    async fn persona(&self, id: &str) -> Result<Option<Persona>>;

    /// Batch lookup. Unknown ids are skipped; order follows `ids`.
    async fn personas(&self, ids: &[String]) -> Result<Vec<Persona>>;

    async fn default_persona(&self, user_id: &str) -> Result<Option<Persona>>;

    async fn persona_override(&self, user_id: &str, personality_id: &str) -> Result<Option<Persona>>;

    async fn system_prompt(&self, id: &str) -> Result<Option<SystemPrompt>>;

    async fn llm_settings(&self, id: &str) -> Result<Option<LlmSettings>>;

    async fn user_system_prompt_override(
        &self,
        user_id: &str,
        personality_id: &str,
    ) -> Result<Option<SystemPrompt>>;

    async fn user_llm_override(&self, user_id: &str, personality_id: &str) -> Result<Option<LlmSettings>>;
}

/// Append-only conversation history keyed by (channel, personality).
#[async_trait]
pub trait HistoryRepository: Send + Sync {
    /// The most recent `limit` entries, newest first.
    async fn recent(&self, channel_id: &str, personality_id: &str, limit: usize) -> Result<Vec<HistoryEntry>>;

    /// Append entries. All entries must share one (channel, personality).
    async fn append(&self, entries: &[HistoryEntry]) -> Result<()>;
}
