//! Process-local configuration repository.
//!
//! Backs `JsonSnapshotStore` and doubles as the administrative edit surface:
//! every mutation lands in the shared tables immediately, so a removed
//! override stops applying on the very next resolve.

use async_trait::async_trait;
use parking_lot::RwLock;

use ch_domain::error::{Error, Result};
use ch_domain::model::{LlmSettings, Persona, Personality, SystemPrompt};

use crate::repository::ConfigRepository;
use crate::snapshot::{pair, Snapshot, Tables};

#[derive(Default)]
pub struct InMemoryRepository {
    tables: RwLock<Tables>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Result<Self> {
        let tables = Tables::from_snapshot(snapshot).map_err(|message| Error::Schema {
            path: "<memory>".into(),
            message,
        })?;
        Ok(Self::from_tables(tables))
    }

    pub(crate) fn from_tables(tables: Tables) -> Self {
        Self {
            tables: RwLock::new(tables),
        }
    }

    pub(crate) fn replace_tables(&self, tables: Tables) {
        *self.tables.write() = tables;
    }

    pub fn snapshot(&self) -> Snapshot {
        self.tables.read().to_snapshot()
    }

    // ── administrative edits ────────────────────────────────────────

    pub fn upsert_personality(&self, personality: Personality) {
        self.tables
            .write()
            .personalities
            .insert(personality.id.clone(), personality);
    }

    pub fn upsert_persona(&self, persona: Persona) {
        self.tables.write().personas.insert(persona.id.clone(), persona);
    }

    pub fn upsert_system_prompt(&self, prompt: SystemPrompt) {
        self.tables.write().system_prompts.insert(prompt.id.clone(), prompt);
    }

    pub fn upsert_llm_settings(&self, settings: LlmSettings) {
        self.tables.write().llm_settings.insert(settings.id.clone(), settings);
    }

    pub fn set_default_persona(&self, user_id: &str, persona_id: &str) -> Result<()> {
        let mut t = self.tables.write();
        if !t.personas.contains_key(persona_id) {
            return Err(Error::NotFound(format!("persona {persona_id}")));
        }
        t.default_personas.insert(user_id.to_owned(), persona_id.to_owned());
        Ok(())
    }

    pub fn set_persona_override(&self, user_id: &str, personality_id: &str, persona_id: &str) -> Result<()> {
        let mut t = self.tables.write();
        if !t.personas.contains_key(persona_id) {
            return Err(Error::NotFound(format!("persona {persona_id}")));
        }
        t.persona_overrides
            .insert(pair(user_id, personality_id), persona_id.to_owned());
        Ok(())
    }

    pub fn remove_persona_override(&self, user_id: &str, personality_id: &str) -> bool {
        self.tables
            .write()
            .persona_overrides
            .remove(&pair(user_id, personality_id))
            .is_some()
    }

    pub fn set_system_prompt_override(&self, user_id: &str, personality_id: &str, prompt_id: &str) -> Result<()> {
        let mut t = self.tables.write();
        if !t.system_prompts.contains_key(prompt_id) {
            return Err(Error::NotFound(format!("system prompt {prompt_id}")));
        }
        t.system_prompt_overrides
            .insert(pair(user_id, personality_id), prompt_id.to_owned());
        Ok(())
    }

    pub fn remove_system_prompt_override(&self, user_id: &str, personality_id: &str) -> bool {
        self.tables
            .write()
            .system_prompt_overrides
            .remove(&pair(user_id, personality_id))
            .is_some()
    }

    pub fn set_llm_override(&self, user_id: &str, personality_id: &str, settings_id: &str) -> Result<()> {
        let mut t = self.tables.write();
        if !t.llm_settings.contains_key(settings_id) {
            return Err(Error::NotFound(format!("llm settings {settings_id}")));
        }
        t.llm_overrides
            .insert(pair(user_id, personality_id), settings_id.to_owned());
        Ok(())
    }

    pub fn remove_llm_override(&self, user_id: &str, personality_id: &str) -> bool {
        self.tables
            .write()
            .llm_overrides
            .remove(&pair(user_id, personality_id))
            .is_some()
    }
}

#[async_trait]
impl ConfigRepository for InMemoryRepository {
    async fn personality(&self, id: &str) -> Result<Option<Personality>> {
        Ok(self.tables.read().personalities.get(id).cloned())
    }

    async fn persona(&self, id: &str) -> Result<Option<Persona>> {
        Ok(self.tables.read().personas.get(id).cloned())
    }

    async fn personas(&self, ids: &[String]) -> Result<Vec<Persona>> {
        let t = self.tables.read();
        Ok(ids.iter().filter_map(|id| t.personas.get(id).cloned()).collect())
    }

    async fn default_persona(&self, user_id: &str) -> Result<Option<Persona>> {
        let t = self.tables.read();
        Ok(t.default_personas
            .get(user_id)
            .and_then(|id| t.personas.get(id))
            .cloned())
    }

    async fn persona_override(&self, user_id: &str, personality_id: &str) -> Result<Option<Persona>> {
        let t = self.tables.read();
        Ok(t.persona_overrides
            .get(&pair(user_id, personality_id))
            .and_then(|id| t.personas.get(id))
            .cloned())
    }

    async fn system_prompt(&self, id: &str) -> Result<Option<SystemPrompt>> {
        Ok(self.tables.read().system_prompts.get(id).cloned())
    }

    async fn llm_settings(&self, id: &str) -> Result<Option<LlmSettings>> {
        Ok(self.tables.read().llm_settings.get(id).cloned())
    }

    async fn user_system_prompt_override(
        &self,
        user_id: &str,
        personality_id: &str,
    ) -> Result<Option<SystemPrompt>> {
        let t = self.tables.read();
        Ok(t.system_prompt_overrides
            .get(&pair(user_id, personality_id))
            .and_then(|id| t.system_prompts.get(id))
            .cloned())
    }

    async fn user_llm_override(&self, user_id: &str, personality_id: &str) -> Result<Option<LlmSettings>> {
        let t = self.tables.read();
        Ok(t.llm_overrides
            .get(&pair(user_id, personality_id))
            .and_then(|id| t.llm_settings.get(id))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn persona(id: &str, name: &str) -> Persona {
        Persona {
            id: id.into(),
            owner_user_id: "u1".into(),
            name: name.into(),
            preferred_name: None,
            pronouns: None,
            content: String::new(),
        }
    }

    #[tokio::test]
    async fn batch_lookup_skips_unknown_and_keeps_order() {
        let repo = InMemoryRepository::new();
        repo.upsert_persona(persona("a", "Ash"));
        repo.upsert_persona(persona("b", "Bex"));

        let ids = vec!["b".to_string(), "zz".to_string(), "a".to_string()];
        let names: Vec<_> = repo
            .personas(&ids)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["Bex", "Ash"]);
    }

    #[tokio::test]
    async fn override_requires_existing_persona() {
        let repo = InMemoryRepository::new();
        let err = repo.set_persona_override("u1", "p1", "missing").unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn removed_override_is_gone_immediately() {
        let repo = InMemoryRepository::new();
        repo.upsert_persona(persona("a", "Ash"));
        repo.set_persona_override("u1", "p1", "a").unwrap();
        assert!(repo.persona_override("u1", "p1").await.unwrap().is_some());

        assert!(repo.remove_persona_override("u1", "p1"));
        assert!(repo.persona_override("u1", "p1").await.unwrap().is_none());
        assert!(!repo.remove_persona_override("u1", "p1"));
    }
}
