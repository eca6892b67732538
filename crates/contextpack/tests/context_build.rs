use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use ch_contextpack::{ConfigResolver, ConfigSource, ContextBuilder};
use ch_domain::config::{ContextConfig, SystemDefaultsConfig};
use ch_domain::error::{Error, Result};
use ch_domain::message::{MessageContent, Role};
use ch_domain::model::{
    CharacterFields, HistoryEntry, HistoryRole, LlmSettings, MemorySearchSettings, Persona, Personality, SystemPrompt,
};
use ch_domain::request::GenerationRequest;
use ch_memory::{
    IngestResponse, InMemoryVectorStore, MemoryHit, MemoryIngestRequest, MemoryRecallService, MemorySearchRequest,
    VectorMemoryProvider,
};
use ch_store::{HistoryRepository, InMemoryHistoryStore, InMemoryRepository};

// ── fixtures ────────────────────────────────────────────────────────

fn persona(id: &str, owner: &str, name: &str, preferred: Option<&str>) -> Persona {
    Persona {
        id: id.into(),
        owner_user_id: owner.into(),
        name: name.into(),
        preferred_name: preferred.map(String::from),
        pronouns: Some("she/her".into()),
        content: format!("{name} keeps the lighthouse running."),
    }
}

fn settings(id: &str, model: &str) -> LlmSettings {
    LlmSettings {
        id: id.into(),
        name: id.into(),
        model: model.into(),
        temperature: Some(0.8),
        top_p: None,
        max_tokens: Some(512),
        frequency_penalty: None,
        presence_penalty: None,
        memory: MemorySearchSettings::default(),
    }
}

fn seeded_repo() -> Arc<InMemoryRepository> {
    let repo = InMemoryRepository::new();
    repo.upsert_system_prompt(SystemPrompt {
        id: "sp-captain".into(),
        name: "Captain prompt".into(),
        content: "You are the ship's captain.".into(),
    });
    repo.upsert_llm_settings(settings("llm-captain", "openai/gpt-4o"));
    repo.upsert_personality(Personality {
        id: "captain".into(),
        name: "captain".into(),
        display_name: "The Captain".into(),
        character: CharacterFields {
            description: "A weathered sea captain.".into(),
            tone: "Gruff but kind.".into(),
            ..Default::default()
        },
        system_prompt_id: Some("sp-captain".into()),
        llm_settings_id: Some("llm-captain".into()),
    });
    repo.upsert_persona(persona("lila", "u1", "Delilah", Some("Lila")));
    repo.upsert_persona(persona("marco", "u2", "Marco", None));
    repo.set_default_persona("u1", "lila").unwrap();
    repo.set_default_persona("u2", "marco").unwrap();
    Arc::new(repo)
}

fn entry(persona_id: &str, role: HistoryRole, content: &str, at: DateTime<Utc>) -> HistoryEntry {
    HistoryEntry {
        channel_id: "C".into(),
        personality_id: "captain".into(),
        persona_id: persona_id.into(),
        role,
        content: content.into(),
        created_at: at,
    }
}

fn no_memory() -> Arc<MemoryRecallService> {
    Arc::new(MemoryRecallService::new(None, Duration::from_secs(10), Duration::from_secs(1)))
}

fn builder_with(
    repo: Arc<InMemoryRepository>,
    history: Arc<InMemoryHistoryStore>,
    recall: Arc<MemoryRecallService>,
    caps: ContextConfig,
) -> ContextBuilder {
    let resolver = ConfigResolver::new(repo, SystemDefaultsConfig::default());
    ContextBuilder::new(resolver, history, recall, caps)
}

fn builder(repo: Arc<InMemoryRepository>, history: Arc<InMemoryHistoryStore>) -> ContextBuilder {
    builder_with(repo, history, no_memory(), ContextConfig::default())
}

fn request(user: &str) -> GenerationRequest {
    GenerationRequest::new("C", "captain", user, "hi, are you there?")
}

fn count_blocks(text: &str) -> usize {
    text.matches("=== PARTICIPANT:").count()
}

// ── participants ────────────────────────────────────────────────────

#[tokio::test]
async fn repeated_persona_in_history_yields_one_block() {
    let history = Arc::new(InMemoryHistoryStore::new());
    let base = Utc::now() - chrono::Duration::hours(1);
    let entries: Vec<HistoryEntry> = (0..24)
        .map(|i| {
            let role = if i % 2 == 0 { HistoryRole::User } else { HistoryRole::Assistant };
            entry("lila", role, &format!("turn {i}"), base + chrono::Duration::seconds(i))
        })
        .collect();
    history.append(&entries).await.unwrap();

    let ctx = builder(seeded_repo(), history).build(&request("u1"), 30).await.unwrap();

    assert_eq!(ctx.participants.len(), 1);
    assert_eq!(count_blocks(&ctx.system_text), 1);
    assert_eq!(ctx.history.len(), 24);
    assert_eq!(ctx.history.first().unwrap().content, "turn 0");
    assert_eq!(ctx.history.last().unwrap().content, "turn 23");
}

#[tokio::test]
async fn empty_history_still_has_the_active_persona() {
    let ctx = builder(seeded_repo(), Arc::new(InMemoryHistoryStore::new()))
        .build(&request("u1"), 20)
        .await
        .unwrap();

    assert_eq!(ctx.participants.len(), 1);
    assert_eq!(ctx.participants[0].id, "lila");
    assert_eq!(count_blocks(&ctx.system_text), 1);
    assert!(ctx.system_text.contains("=== PARTICIPANT: Lila ===\n"));
    assert!(ctx.system_text.contains("ACTIVE: true"));
    assert_eq!(ctx.report.history_entries, 0);
}

#[tokio::test]
async fn active_persona_is_listed_first_then_history_order() {
    let history = Arc::new(InMemoryHistoryStore::new());
    let base = Utc::now() - chrono::Duration::hours(1);
    history
        .append(&[
            entry("marco", HistoryRole::User, "ahoy", base),
            entry("marco", HistoryRole::Assistant, "ahoy yourself", base + chrono::Duration::seconds(1)),
            entry("lila", HistoryRole::User, "evening", base + chrono::Duration::seconds(2)),
            entry("ghost", HistoryRole::User, "boo", base + chrono::Duration::seconds(3)),
        ])
        .await
        .unwrap();

    let ctx = builder(seeded_repo(), history).build(&request("u1"), 20).await.unwrap();

    let ids: Vec<_> = ctx.participants.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["lila", "marco"]);
    assert_eq!(count_blocks(&ctx.system_text), 2);

    let messages = ctx.to_messages();
    assert_eq!(messages.len(), 6);
    assert_eq!(messages[0].role, Role::System);
    assert_eq!(messages[1].content, MessageContent::Text("Marco: ahoy".into()));
    assert_eq!(messages[2].role, Role::Assistant);
    assert_eq!(messages[5].content, MessageContent::Text("Lila: hi, are you there?".into()));
}

// ── config precedence ───────────────────────────────────────────────

#[tokio::test]
async fn llm_settings_precedence_and_fallback_after_removal() {
    let repo = seeded_repo();
    repo.upsert_llm_settings(settings("llm-u1", "local/llama3"));
    let resolver = ConfigResolver::new(repo.clone(), SystemDefaultsConfig::default());

    let r = resolver.resolve("u1", "captain").await.unwrap();
    assert_eq!(r.llm_settings.id, "llm-captain");
    assert_eq!(r.llm_settings_source, ConfigSource::Personality);

    repo.set_llm_override("u1", "captain", "llm-u1").unwrap();
    let r = resolver.resolve("u1", "captain").await.unwrap();
    assert_eq!(r.llm_settings.model, "local/llama3");
    assert_eq!(r.llm_settings_source, ConfigSource::UserOverride);
    // The prompt chain is independent of the LLM override.
    assert_eq!(r.system_prompt_source, ConfigSource::Personality);

    // Another user is unaffected.
    let r = resolver.resolve("u2", "captain").await.unwrap();
    assert_eq!(r.llm_settings.id, "llm-captain");

    assert!(repo.remove_llm_override("u1", "captain"));
    let r = resolver.resolve("u1", "captain").await.unwrap();
    assert_eq!(r.llm_settings.id, "llm-captain");
}

#[tokio::test]
async fn personality_without_templates_uses_system_defaults() {
    let repo = seeded_repo();
    repo.upsert_personality(Personality {
        id: "plain".into(),
        name: "plain".into(),
        display_name: "Plain".into(),
        character: CharacterFields::default(),
        system_prompt_id: None,
        llm_settings_id: None,
    });
    let defaults = SystemDefaultsConfig::default();
    let resolver = ConfigResolver::new(repo, defaults.clone());

    let r = resolver.resolve("u1", "plain").await.unwrap();
    assert_eq!(r.system_prompt_source, ConfigSource::SystemDefault);
    assert_eq!(r.system_prompt.content, defaults.system_prompt);
    assert_eq!(r.llm_settings_source, ConfigSource::SystemDefault);
    assert_eq!(r.llm_settings.model, defaults.model);
}

#[tokio::test]
async fn system_prompt_override_wins_independently() {
    let repo = seeded_repo();
    repo.upsert_system_prompt(SystemPrompt {
        id: "sp-terse".into(),
        name: "Terse".into(),
        content: "Answer in one line.".into(),
    });
    repo.set_system_prompt_override("u1", "captain", "sp-terse").unwrap();
    let resolver = ConfigResolver::new(repo, SystemDefaultsConfig::default());

    let r = resolver.resolve("u1", "captain").await.unwrap();
    assert_eq!(r.system_prompt.id, "sp-terse");
    assert_eq!(r.system_prompt_source, ConfigSource::UserOverride);
    assert_eq!(r.llm_settings_source, ConfigSource::Personality);
}

#[tokio::test]
async fn persona_override_beats_default() {
    let repo = seeded_repo();
    repo.upsert_persona(persona("lila-pirate", "u1", "Red Lila", None));
    repo.set_persona_override("u1", "captain", "lila-pirate").unwrap();
    let resolver = ConfigResolver::new(repo.clone(), SystemDefaultsConfig::default());

    let r = resolver.resolve("u1", "captain").await.unwrap();
    assert_eq!(r.persona.id, "lila-pirate");
    assert_eq!(r.persona_source, ConfigSource::UserOverride);

    repo.remove_persona_override("u1", "captain");
    let r = resolver.resolve("u1", "captain").await.unwrap();
    assert_eq!(r.persona.id, "lila");
    assert_eq!(r.persona_source, ConfigSource::UserDefault);
}

#[tokio::test]
async fn user_without_persona_fails_the_build() {
    let err = builder(seeded_repo(), Arc::new(InMemoryHistoryStore::new()))
        .build(&request("stranger"), 20)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PersonaNotFound { ref user_id } if user_id == "stranger"));
}

#[tokio::test]
async fn unknown_personality_is_not_found() {
    let resolver = ConfigResolver::new(seeded_repo(), SystemDefaultsConfig::default());
    let err = resolver.resolve("u1", "nobody").await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

// ── history window ──────────────────────────────────────────────────

#[tokio::test]
async fn context_window_from_settings_overrides_default() {
    let repo = seeded_repo();
    let mut narrow = settings("llm-captain", "openai/gpt-4o");
    narrow.memory.context_window = Some(4);
    repo.upsert_llm_settings(narrow);

    let history = Arc::new(InMemoryHistoryStore::new());
    let base = Utc::now() - chrono::Duration::hours(1);
    let entries: Vec<HistoryEntry> = (0..10)
        .map(|i| entry("lila", HistoryRole::User, &format!("turn {i}"), base + chrono::Duration::seconds(i)))
        .collect();
    history.append(&entries).await.unwrap();

    let ctx = builder(repo, history).build(&request("u1"), 20).await.unwrap();
    let texts: Vec<_> = ctx.history.iter().map(|e| e.content.as_str()).collect();
    assert_eq!(texts, vec!["turn 6", "turn 7", "turn 8", "turn 9"]);
}

// ── memory ──────────────────────────────────────────────────────────

#[tokio::test]
async fn recall_skips_memories_inside_the_buffer() {
    let now = Utc::now();
    let store = Arc::new(InMemoryVectorStore::new());
    store.insert("the lamp stayed lit", "lila", now - chrono::Duration::seconds(1));
    store.insert("the lamp stayed lit tonight", "lila", now - chrono::Duration::seconds(60));
    let recall = Arc::new(MemoryRecallService::new(
        Some(store),
        Duration::from_secs(10),
        Duration::from_secs(1),
    ));

    let b = builder_with(
        seeded_repo(),
        Arc::new(InMemoryHistoryStore::new()),
        recall,
        ContextConfig::default(),
    );
    let req = GenerationRequest::new("C", "captain", "u1", "the lamp stayed lit");
    let ctx = b.build_at(&req, 20, now).await.unwrap();

    assert_eq!(ctx.memory.len(), 1);
    assert_eq!(ctx.memory[0].text, "the lamp stayed lit tonight");
    assert_eq!(ctx.system_text.matches("=== MEMORY ===").count(), 1);
}

struct Unreachable;

#[async_trait::async_trait]
impl VectorMemoryProvider for Unreachable {
    async fn search(&self, _req: MemorySearchRequest) -> Result<Vec<MemoryHit>> {
        Err(Error::Memory("connection refused".into()))
    }
    async fn ingest(&self, _req: MemoryIngestRequest) -> Result<IngestResponse> {
        Err(Error::Memory("connection refused".into()))
    }
    async fn health(&self) -> Result<serde_json::Value> {
        Err(Error::Memory("connection refused".into()))
    }
}

#[tokio::test]
async fn unavailable_memory_degrades_instead_of_failing() {
    let recall = Arc::new(MemoryRecallService::new(
        Some(Arc::new(Unreachable)),
        Duration::from_secs(10),
        Duration::from_secs(1),
    ));
    let b = builder_with(
        seeded_repo(),
        Arc::new(InMemoryHistoryStore::new()),
        recall,
        ContextConfig::default(),
    );

    let ctx = b.build(&request("u1"), 20).await.unwrap();
    assert!(ctx.report.memory_degraded);
    assert!(ctx.memory.is_empty());
    assert!(ctx.system_text.contains("UNAVAILABLE: true"));
}

// ── rendering ───────────────────────────────────────────────────────

#[tokio::test]
async fn long_persona_content_is_truncated_and_reported() {
    let repo = seeded_repo();
    let mut long = persona("lila", "u1", "Delilah", Some("Lila"));
    long.content = "x".repeat(500);
    repo.upsert_persona(long);

    let caps = ContextConfig {
        persona_max_chars: 100,
        ..Default::default()
    };
    let b = builder_with(repo, Arc::new(InMemoryHistoryStore::new()), no_memory(), caps);
    let ctx = b.build(&request("u1"), 20).await.unwrap();

    let section = ctx
        .report
        .sections
        .iter()
        .find(|s| s.label == "participant:lila")
        .unwrap();
    assert!(section.truncated);
    assert_eq!(section.raw_chars, 500);
    assert!(ctx.system_text.contains("[TRUNCATED]"));
    assert!(ctx.system_text.contains("TRUNCATED: true"));
}

#[tokio::test]
async fn single_participant_messages_are_unprefixed() {
    let ctx = builder(seeded_repo(), Arc::new(InMemoryHistoryStore::new()))
        .build(&request("u1").with_images(vec!["https://img/1.png".into()]), 20)
        .await
        .unwrap();

    let messages = ctx.to_messages();
    assert_eq!(messages.len(), 2);
    assert!(ctx.system_text.starts_with("=== SYSTEM_PROMPT ==="));
    assert!(ctx.system_text.contains("=== CHARACTER: The Captain ==="));
    assert_eq!(messages[1].content.extract_all_text(), "hi, are you there?");
    assert!(matches!(messages[1].content, MessageContent::Parts(_)));
}
