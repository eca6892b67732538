use serde::{Deserialize, Serialize};

use crate::model::{LlmSettings, MemorySearchSettings, SystemPrompt};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// System-wide defaults (last level of the override chain)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemDefaultsConfig {
    #[serde(default = "d_prompt")]
    pub system_prompt: String,
    /// `provider_id/model_name`.
    #[serde(default = "d_model")]
    pub model: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub memory: MemorySearchSettings,
}

impl Default for SystemDefaultsConfig {
    fn default() -> Self {
        Self {
            system_prompt: d_prompt(),
            model: d_model(),
            temperature: None,
            max_tokens: None,
            memory: MemorySearchSettings::default(),
        }
    }
}

pub const SYSTEM_DEFAULT_ID: &str = "system-default";

impl SystemDefaultsConfig {
    pub fn system_prompt(&self) -> SystemPrompt {
        SystemPrompt {
            id: SYSTEM_DEFAULT_ID.into(),
            name: "System default".into(),
            content: self.system_prompt.clone(),
        }
    }

    pub fn llm_settings(&self) -> LlmSettings {
        LlmSettings {
            id: SYSTEM_DEFAULT_ID.into(),
            name: "System default".into(),
            model: self.model.clone(),
            temperature: self.temperature,
            top_p: None,
            max_tokens: self.max_tokens,
            frequency_penalty: None,
            presence_penalty: None,
            memory: self.memory.clone(),
        }
    }
}

fn d_prompt() -> String {
    "You are a character in an ongoing group conversation. Stay in character \
     and reply to the most recent message."
        .into()
}
fn d_model() -> String {
    "openai/gpt-4o-mini".into()
}
