//! Strict-schema JSON snapshot of the configuration tables.
//!
//! The snapshot is decoded once at the boundary: unknown fields, duplicate
//! ids and dangling references all fail with `Error::Schema` naming the
//! file. Nothing downstream has to cope with half-valid records.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use ch_domain::error::{Error, Result};
use ch_domain::model::{LlmSettings, Persona, Personality, SystemPrompt};

use crate::in_memory::InMemoryRepository;
use crate::repository::ConfigRepository;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire shape
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Snapshot {
    #[serde(default)]
    pub personalities: Vec<Personality>,
    #[serde(default)]
    pub personas: Vec<Persona>,
    #[serde(default)]
    pub system_prompts: Vec<SystemPrompt>,
    #[serde(default)]
    pub llm_settings: Vec<LlmSettings>,
    #[serde(default)]
    pub default_personas: Vec<DefaultPersona>,
    #[serde(default)]
    pub persona_overrides: Vec<PersonaOverride>,
    #[serde(default)]
    pub system_prompt_overrides: Vec<TemplateOverride>,
    #[serde(default)]
    pub llm_overrides: Vec<TemplateOverride>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DefaultPersona {
    pub user_id: String,
    pub persona_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PersonaOverride {
    pub user_id: String,
    pub personality_id: String,
    pub persona_id: String,
}

/// A per-(user, personality) pointer at a system prompt or LLM settings row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TemplateOverride {
    pub user_id: String,
    pub personality_id: String,
    pub template_id: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Indexed tables
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(crate) type PairKey = (String, String);

/// Snapshot rows indexed for lookup.
#[derive(Debug, Clone, Default)]
pub(crate) struct Tables {
    pub personalities: HashMap<String, Personality>,
    pub personas: HashMap<String, Persona>,
    pub system_prompts: HashMap<String, SystemPrompt>,
    pub llm_settings: HashMap<String, LlmSettings>,
    /// user → persona id
    pub default_personas: HashMap<String, String>,
    /// (user, personality) → persona id
    pub persona_overrides: HashMap<PairKey, String>,
    /// (user, personality) → system prompt id
    pub system_prompt_overrides: HashMap<PairKey, String>,
    /// (user, personality) → llm settings id
    pub llm_overrides: HashMap<PairKey, String>,
}

pub(crate) fn pair(user_id: &str, personality_id: &str) -> PairKey {
    (user_id.to_owned(), personality_id.to_owned())
}

impl Tables {
    /// Index a snapshot, rejecting duplicates and dangling references.
    pub fn from_snapshot(snapshot: Snapshot) -> std::result::Result<Self, String> {
        let mut t = Tables::default();

        for p in snapshot.personalities {
            if let Some(prev) = t.personalities.insert(p.id.clone(), p) {
                return Err(format!("duplicate personality id {:?}", prev.id));
            }
        }
        for p in snapshot.personas {
            if let Some(prev) = t.personas.insert(p.id.clone(), p) {
                return Err(format!("duplicate persona id {:?}", prev.id));
            }
        }
        for s in snapshot.system_prompts {
            if let Some(prev) = t.system_prompts.insert(s.id.clone(), s) {
                return Err(format!("duplicate system prompt id {:?}", prev.id));
            }
        }
        for l in snapshot.llm_settings {
            if let Some(prev) = t.llm_settings.insert(l.id.clone(), l) {
                return Err(format!("duplicate llm settings id {:?}", prev.id));
            }
        }

        for p in t.personalities.values() {
            if let Some(id) = &p.system_prompt_id {
                t.require_system_prompt(id, &format!("personality {:?}", p.id))?;
            }
            if let Some(id) = &p.llm_settings_id {
                t.require_llm_settings(id, &format!("personality {:?}", p.id))?;
            }
        }

        for d in snapshot.default_personas {
            t.require_persona(&d.persona_id, &format!("default persona of {:?}", d.user_id))?;
            if t.default_personas.insert(d.user_id.clone(), d.persona_id).is_some() {
                return Err(format!("user {:?} has more than one default persona", d.user_id));
            }
        }
        for o in snapshot.persona_overrides {
            let what = format!("persona override ({:?}, {:?})", o.user_id, o.personality_id);
            t.require_personality(&o.personality_id, &what)?;
            t.require_persona(&o.persona_id, &what)?;
            if t
                .persona_overrides
                .insert(pair(&o.user_id, &o.personality_id), o.persona_id)
                .is_some()
            {
                return Err(format!("duplicate {what}"));
            }
        }
        for o in snapshot.system_prompt_overrides {
            let what = format!("system prompt override ({:?}, {:?})", o.user_id, o.personality_id);
            t.require_personality(&o.personality_id, &what)?;
            t.require_system_prompt(&o.template_id, &what)?;
            if t
                .system_prompt_overrides
                .insert(pair(&o.user_id, &o.personality_id), o.template_id)
                .is_some()
            {
                return Err(format!("duplicate {what}"));
            }
        }
        for o in snapshot.llm_overrides {
            let what = format!("llm override ({:?}, {:?})", o.user_id, o.personality_id);
            t.require_personality(&o.personality_id, &what)?;
            t.require_llm_settings(&o.template_id, &what)?;
            if t
                .llm_overrides
                .insert(pair(&o.user_id, &o.personality_id), o.template_id)
                .is_some()
            {
                return Err(format!("duplicate {what}"));
            }
        }

        Ok(t)
    }

    /// Flatten back into the wire shape (sorted for stable output).
    pub fn to_snapshot(&self) -> Snapshot {
        fn sorted<T: Clone>(map: &HashMap<String, T>) -> Vec<T> {
            let mut keys: Vec<_> = map.keys().collect();
            keys.sort();
            keys.into_iter().map(|k| map[k].clone()).collect()
        }
        fn overrides(map: &HashMap<PairKey, String>) -> Vec<TemplateOverride> {
            let mut rows: Vec<_> = map
                .iter()
                .map(|((u, p), id)| TemplateOverride {
                    user_id: u.clone(),
                    personality_id: p.clone(),
                    template_id: id.clone(),
                })
                .collect();
            rows.sort_by(|a, b| (&a.user_id, &a.personality_id).cmp(&(&b.user_id, &b.personality_id)));
            rows
        }

        let mut default_personas: Vec<_> = self
            .default_personas
            .iter()
            .map(|(u, p)| DefaultPersona {
                user_id: u.clone(),
                persona_id: p.clone(),
            })
            .collect();
        default_personas.sort_by(|a, b| a.user_id.cmp(&b.user_id));

        Snapshot {
            personalities: sorted(&self.personalities),
            personas: sorted(&self.personas),
            system_prompts: sorted(&self.system_prompts),
            llm_settings: sorted(&self.llm_settings),
            default_personas,
            persona_overrides: overrides(&self.persona_overrides)
                .into_iter()
                .map(|o| PersonaOverride {
                    user_id: o.user_id,
                    personality_id: o.personality_id,
                    persona_id: o.template_id,
                })
                .collect(),
            system_prompt_overrides: overrides(&self.system_prompt_overrides),
            llm_overrides: overrides(&self.llm_overrides),
        }
    }

    fn require_personality(&self, id: &str, what: &str) -> std::result::Result<(), String> {
        if self.personalities.contains_key(id) {
            Ok(())
        } else {
            Err(format!("{what} references unknown personality {id:?}"))
        }
    }

    fn require_persona(&self, id: &str, what: &str) -> std::result::Result<(), String> {
        if self.personas.contains_key(id) {
            Ok(())
        } else {
            Err(format!("{what} references unknown persona {id:?}"))
        }
    }

    fn require_system_prompt(&self, id: &str, what: &str) -> std::result::Result<(), String> {
        if self.system_prompts.contains_key(id) {
            Ok(())
        } else {
            Err(format!("{what} references unknown system prompt {id:?}"))
        }
    }

    fn require_llm_settings(&self, id: &str, what: &str) -> std::result::Result<(), String> {
        if self.llm_settings.contains_key(id) {
            Ok(())
        } else {
            Err(format!("{what} references unknown llm settings {id:?}"))
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// File-backed store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Configuration tables loaded from a JSON snapshot file.
///
/// `reload()` re-reads the file and swaps the tables atomically; a reload
/// that fails validation leaves the previous tables in place.
pub struct JsonSnapshotStore {
    path: PathBuf,
    repo: InMemoryRepository,
}

impl JsonSnapshotStore {
    pub fn load(path: &Path) -> Result<Self> {
        let tables = read_tables(path)?;
        tracing::info!(
            path = %path.display(),
            personalities = tables.personalities.len(),
            personas = tables.personas.len(),
            "config snapshot loaded"
        );
        Ok(Self {
            path: path.to_path_buf(),
            repo: InMemoryRepository::from_tables(tables),
        })
    }

    pub fn reload(&self) -> Result<()> {
        let tables = read_tables(&self.path)?;
        self.repo.replace_tables(tables);
        tracing::info!(path = %self.path.display(), "config snapshot reloaded");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn read_tables(path: &Path) -> Result<Tables> {
    let raw = std::fs::read_to_string(path)?;
    let schema_err = |message: String| Error::Schema {
        path: path.display().to_string(),
        message,
    };
    let snapshot: Snapshot = serde_json::from_str(&raw).map_err(|e| schema_err(e.to_string()))?;
    Tables::from_snapshot(snapshot).map_err(schema_err)
}

#[async_trait]
impl ConfigRepository for JsonSnapshotStore {
    async fn personality(&self, id: &str) -> Result<Option<Personality>> {
        self.repo.personality(id).await
    }

    async fn persona(&self, id: &str) -> Result<Option<Persona>> {
        self.repo.persona(id).await
    }

    async fn personas(&self, ids: &[String]) -> Result<Vec<Persona>> {
        self.repo.personas(ids).await
    }

    async fn default_persona(&self, user_id: &str) -> Result<Option<Persona>> {
        self.repo.default_persona(user_id).await
    }

    async fn persona_override(&self, user_id: &str, personality_id: &str) -> Result<Option<Persona>> {
        self.repo.persona_override(user_id, personality_id).await
    }

    async fn system_prompt(&self, id: &str) -> Result<Option<SystemPrompt>> {
        self.repo.system_prompt(id).await
    }

    async fn llm_settings(&self, id: &str) -> Result<Option<LlmSettings>> {
        self.repo.llm_settings(id).await
    }

    async fn user_system_prompt_override(
        &self,
        user_id: &str,
        personality_id: &str,
    ) -> Result<Option<SystemPrompt>> {
        self.repo.user_system_prompt_override(user_id, personality_id).await
    }

    async fn user_llm_override(&self, user_id: &str, personality_id: &str) -> Result<Option<LlmSettings>> {
        self.repo.user_llm_override(user_id, personality_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"{
        "personalities": [
            { "id": "p1", "name": "nova", "display_name": "Nova", "system_prompt_id": "sp1" }
        ],
        "personas": [
            { "id": "lila", "owner_user_id": "u1", "name": "Lila", "pronouns": "she/her" }
        ],
        "system_prompts": [ { "id": "sp1", "name": "nova", "content": "You are Nova." } ],
        "default_personas": [ { "user_id": "u1", "persona_id": "lila" } ]
    }"#;

    fn write(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("snapshot.json");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[tokio::test]
    async fn loads_valid_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSnapshotStore::load(&write(&dir, VALID)).unwrap();
        let persona = store.default_persona("u1").await.unwrap().unwrap();
        assert_eq!(persona.name, "Lila");
        assert!(store.default_persona("u2").await.unwrap().is_none());
    }

    #[test]
    fn unknown_field_fails_with_schema_error() {
        let dir = tempfile::tempdir().unwrap();
        let body = VALID.replace("\"pronouns\"", "\"pronoun_set\"");
        let err = JsonSnapshotStore::load(&write(&dir, &body)).err().unwrap();
        match err {
            Error::Schema { path, message } => {
                assert!(path.ends_with("snapshot.json"));
                assert!(message.contains("pronoun_set"), "{message}");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn dangling_reference_fails_with_schema_error() {
        let dir = tempfile::tempdir().unwrap();
        let body = VALID.replace("\"persona_id\": \"lila\"", "\"persona_id\": \"ghost\"");
        let err = JsonSnapshotStore::load(&write(&dir, &body)).err().unwrap();
        assert!(matches!(err, Error::Schema { ref message, .. } if message.contains("ghost")));
    }

    #[tokio::test]
    async fn failed_reload_keeps_previous_tables() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, VALID);
        let store = JsonSnapshotStore::load(&path).unwrap();

        std::fs::write(&path, "{ \"personas\": 3 }").unwrap();
        assert!(store.reload().is_err());
        assert!(store.personality("p1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn reload_picks_up_edits() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, VALID);
        let store = JsonSnapshotStore::load(&path).unwrap();

        let edited = VALID.replace("You are Nova.", "You are Nova, tersely.");
        std::fs::write(&path, edited).unwrap();
        store.reload().unwrap();

        let sp = store.system_prompt("sp1").await.unwrap().unwrap();
        assert_eq!(sp.content, "You are Nova, tersely.");
    }

    #[test]
    fn snapshot_round_trips_through_tables() {
        let snapshot: Snapshot = serde_json::from_str(VALID).unwrap();
        let tables = Tables::from_snapshot(snapshot).unwrap();
        let back = tables.to_snapshot();
        assert_eq!(back.personalities.len(), 1);
        assert_eq!(back.default_personas[0].persona_id, "lila");
    }
}
