//! Stored domain records.
//!
//! Every record decodes with `deny_unknown_fields`: a snapshot that drifted
//! from this shape is rejected at the storage boundary instead of being
//! patched up field by field further in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Personality
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A named agent template that conversations address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Personality {
    pub id: String,
    pub name: String,
    pub display_name: String,
    #[serde(default)]
    pub character: CharacterFields,
    /// Default system prompt; `None` falls through to the system default.
    #[serde(default)]
    pub system_prompt_id: Option<String>,
    /// Default LLM settings; `None` falls through to the system default.
    #[serde(default)]
    pub llm_settings_id: Option<String>,
}

/// Free-form character description blocks. Empty fields are not rendered.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CharacterFields {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub traits: String,
    #[serde(default)]
    pub tone: String,
    #[serde(default)]
    pub scenario: String,
    #[serde(default)]
    pub example_dialogue: String,
}

impl CharacterFields {
    /// Labelled, non-empty fields in render order.
    pub fn labelled(&self) -> Vec<(&'static str, &str)> {
        [
            ("Description", self.description.as_str()),
            ("Traits", self.traits.as_str()),
            ("Tone", self.tone.as_str()),
            ("Scenario", self.scenario.as_str()),
            ("Example dialogue", self.example_dialogue.as_str()),
        ]
        .into_iter()
        .filter(|(_, v)| !v.trim().is_empty())
        .collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Persona
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A user-controlled identity used when addressing a personality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Persona {
    pub id: String,
    pub owner_user_id: String,
    pub name: String,
    #[serde(default)]
    pub preferred_name: Option<String>,
    #[serde(default)]
    pub pronouns: Option<String>,
    #[serde(default)]
    pub content: String,
}

impl Persona {
    /// The name the personality should address this persona by.
    pub fn addressed_as(&self) -> &str {
        self.preferred_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(&self.name)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// System prompt + LLM settings templates
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SystemPrompt {
    pub id: String,
    pub name: String,
    pub content: String,
}

/// A named bundle of model, sampling parameters and memory-search tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LlmSettings {
    pub id: String,
    pub name: String,
    /// `provider_id/model_name`, or a bare model name for the default provider.
    pub model: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub frequency_penalty: Option<f32>,
    #[serde(default)]
    pub presence_penalty: Option<f32>,
    #[serde(default)]
    pub memory: MemorySearchSettings,
}

/// Memory-search tuning carried by an LLM settings bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemorySearchSettings {
    #[serde(default = "d_threshold")]
    pub score_threshold: f32,
    #[serde(default = "d_limit")]
    pub result_limit: usize,
    /// Number of history entries to load. `None` uses the pipeline default.
    #[serde(default)]
    pub context_window: Option<usize>,
}

impl Default for MemorySearchSettings {
    fn default() -> Self {
        Self {
            score_threshold: d_threshold(),
            result_limit: d_limit(),
            context_window: None,
        }
    }
}

fn d_threshold() -> f32 {
    0.5
}
fn d_limit() -> usize {
    10
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Conversation history
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryRole {
    User,
    Assistant,
}

/// One append-only turn of a (channel, personality) conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HistoryEntry {
    pub channel_id: String,
    pub personality_id: String,
    /// The persona that spoke (user turns) or was addressed (assistant turns).
    pub persona_id: String,
    pub role: HistoryRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}
