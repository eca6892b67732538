use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use ch_domain::config::ContextConfig;
use ch_domain::error::Result;
use ch_domain::message::Message;
use ch_domain::model::{HistoryEntry, HistoryRole, LlmSettings, Persona, Personality, SystemPrompt};
use ch_domain::request::GenerationRequest;
use ch_memory::{MemoryHit, MemoryRecallService};
use ch_store::HistoryRepository;

use crate::injection::{self, ParticipantHeader};
use crate::report::{ContextReport, SectionReport};
use crate::resolver::{ConfigResolver, ResolvedConfig};
use crate::truncation::{self, Section};

/// Everything one provider call needs, assembled for a single request.
#[derive(Debug, Clone, Serialize)]
pub struct PromptContext {
    pub personality: Personality,
    pub persona: Persona,
    pub system_prompt: SystemPrompt,
    pub llm_settings: LlmSettings,
    /// Each distinct persona once, the active persona first.
    pub participants: Vec<Persona>,
    pub memory: Vec<MemoryHit>,
    /// Oldest first.
    pub history: Vec<HistoryEntry>,
    pub user_text: String,
    pub image_refs: Vec<String>,
    /// The assembled system message.
    pub system_text: String,
    pub report: ContextReport,
}

impl PromptContext {
    /// System message, then history by role, then the new user message.
    ///
    /// In multi-participant conversations user turns are prefixed with the
    /// speaker's name so the model can tell voices apart.
    pub fn to_messages(&self) -> Vec<Message> {
        let named = self.participants.len() > 1;
        let speaker = |persona_id: &str| -> Option<&str> {
            self.participants
                .iter()
                .find(|p| p.id == persona_id)
                .map(Persona::addressed_as)
        };

        let mut messages = Vec::with_capacity(self.history.len() + 2);
        messages.push(Message::system(self.system_text.clone()));

        for entry in &self.history {
            match entry.role {
                HistoryRole::Assistant => messages.push(Message::assistant(entry.content.clone())),
                HistoryRole::User => {
                    let text = match speaker(&entry.persona_id) {
                        Some(name) if named => format!("{name}: {}", entry.content),
                        _ => entry.content.clone(),
                    };
                    messages.push(Message::user(text));
                }
            }
        }

        let text = if named {
            format!("{}: {}", self.persona.addressed_as(), self.user_text)
        } else {
            self.user_text.clone()
        };
        messages.push(Message::user_with_images(text, &self.image_refs));
        messages
    }
}

/// Assembles a [`PromptContext`] from resolved config, history and recall.
pub struct ContextBuilder {
    resolver: ConfigResolver,
    history: Arc<dyn HistoryRepository>,
    recall: Arc<MemoryRecallService>,
    caps: ContextConfig,
}

impl ContextBuilder {
    pub fn new(
        resolver: ConfigResolver,
        history: Arc<dyn HistoryRepository>,
        recall: Arc<MemoryRecallService>,
        caps: ContextConfig,
    ) -> Self {
        Self {
            resolver,
            history,
            recall,
            caps,
        }
    }

    pub fn resolver(&self) -> &ConfigResolver {
        &self.resolver
    }

    pub async fn build(&self, request: &GenerationRequest, history_window: usize) -> Result<PromptContext> {
        self.build_at(request, history_window, Utc::now()).await
    }

    /// Build with an explicit "now" for the memory buffer cutoff.
    ///
    /// `history_window` is the pipeline default; the resolved LLM settings'
    /// `context_window` overrides it.
    pub async fn build_at(
        &self,
        request: &GenerationRequest,
        history_window: usize,
        now: DateTime<Utc>,
    ) -> Result<PromptContext> {
        let resolved = self
            .resolver
            .resolve(&request.user_id, &request.personality_id)
            .await?;

        let window = resolved
            .llm_settings
            .memory
            .context_window
            .unwrap_or(history_window);
        let mut history = self
            .history
            .recent(&request.channel_id, &request.personality_id, window)
            .await?;
        history.reverse();

        let participants = self.participants(&resolved.persona, &history).await?;
        let participant_ids: Vec<String> = participants.iter().map(|p| p.id.clone()).collect();

        let recalled = self
            .recall
            .recall(&request.text, &participant_ids, now, &resolved.llm_settings.memory)
            .await;

        let (system_text, sections) = self.assemble(&resolved, &participants, &recalled.snippets, recalled.degraded);

        let report = ContextReport {
            persona_source: resolved.persona_source,
            system_prompt_source: resolved.system_prompt_source,
            llm_settings_source: resolved.llm_settings_source,
            participants: participants.len(),
            history_entries: history.len(),
            memory_snippets: recalled.snippets.len(),
            memory_degraded: recalled.degraded,
            sections,
            total_chars: system_text.chars().count(),
        };

        let ResolvedConfig {
            personality,
            persona,
            system_prompt,
            llm_settings,
            ..
        } = resolved;

        Ok(PromptContext {
            personality,
            persona,
            system_prompt,
            llm_settings,
            participants,
            memory: recalled.snippets,
            history,
            user_text: request.text.clone(),
            image_refs: request.image_refs.clone(),
            system_text,
            report,
        })
    }

    /// Distinct personas referenced by the history, active persona first,
    /// loaded in one batch lookup.
    async fn participants(&self, active: &Persona, history: &[HistoryEntry]) -> Result<Vec<Persona>> {
        let mut seen: HashSet<&str> = HashSet::new();
        seen.insert(active.id.as_str());
        let mut others: Vec<String> = Vec::new();
        for entry in history {
            if seen.insert(entry.persona_id.as_str()) {
                others.push(entry.persona_id.clone());
            }
        }

        let mut participants = vec![active.clone()];
        if others.is_empty() {
            return Ok(participants);
        }

        let loaded = self.resolver.repository().personas(&others).await?;
        if loaded.len() < others.len() {
            tracing::warn!(
                requested = others.len(),
                loaded = loaded.len(),
                "history references personas that no longer exist; skipping them"
            );
        }
        participants.extend(loaded);
        Ok(participants)
    }

    fn assemble(
        &self,
        resolved: &ResolvedConfig,
        participants: &[Persona],
        memory: &[MemoryHit],
        memory_degraded: bool,
    ) -> (String, Vec<SectionReport>) {
        let caps = &self.caps;
        let mut assembled = String::new();
        let mut reports = Vec::new();

        // ── system prompt ──
        let prompt = Section::capped("system_prompt", &resolved.system_prompt.content, caps.system_prompt_max_chars);
        assembled.push_str(&injection::format_system_prompt(
            &prompt.content,
            resolved.system_prompt_source.as_str(),
        ));
        assembled.push('\n');
        reports.push(section_report(&prompt));

        // ── character ──
        let character_raw: Vec<(&str, &str)> = resolved.personality.character.labelled();
        if !character_raw.is_empty() {
            let joined: String = character_raw
                .iter()
                .map(|(label, value)| format!("{label}:\n{value}\n"))
                .collect();
            let section = Section::capped("character", &joined, caps.character_max_chars);
            let fields = if section.truncated {
                vec![("Character", section.content.clone())]
            } else {
                character_raw
                    .iter()
                    .map(|(label, value)| (*label, value.trim().to_string()))
                    .collect()
            };
            assembled.push_str(&injection::format_character(&resolved.personality.display_name, &fields));
            assembled.push('\n');
            reports.push(section_report(&section));
        }

        // ── participants ──
        for persona in participants {
            let section = Section::capped(format!("participant:{}", persona.id), &persona.content, caps.persona_max_chars);
            let header = ParticipantHeader {
                persona_id: &persona.id,
                addressed_as: persona.addressed_as(),
                name: &persona.name,
                pronouns: persona.pronouns.as_deref(),
                active: persona.id == resolved.persona.id,
                truncated: section.truncated,
            };
            assembled.push_str(&injection::format_participant(&header, &section.content));
            assembled.push('\n');
            reports.push(section_report(&section));
        }

        // ── memory ──
        if memory_degraded {
            assembled.push_str(&injection::format_memory_unavailable());
            assembled.push('\n');
        } else {
            let mut sections: Vec<Section> = memory
                .iter()
                .enumerate()
                .map(|(i, hit)| Section::capped(format!("memory:{i}"), &hit.text, caps.memory_snippet_max_chars))
                .collect();
            truncation::apply_total_cap(&mut sections, caps.memory_total_max_chars);

            for (section, hit) in sections.iter().zip(memory) {
                if section.included {
                    assembled.push_str(&injection::format_memory(
                        &hit.persona_id,
                        hit.score,
                        hit.timestamp,
                        &section.content,
                    ));
                    assembled.push('\n');
                }
                reports.push(section_report(section));
            }
        }

        (assembled.trim_end().to_string(), reports)
    }
}

fn section_report(section: &Section) -> SectionReport {
    SectionReport {
        label: section.label.clone(),
        raw_chars: section.raw_chars,
        injected_chars: if section.included { section.content.chars().count() } else { 0 },
        truncated: section.truncated,
        truncated_total_cap: section.truncated_total_cap,
        included: section.included,
    }
}
