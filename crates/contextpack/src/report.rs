use serde::{Deserialize, Serialize};

/// Which level of the override chain supplied a resolved value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigSource {
    /// A per-(user, personality) override row.
    UserOverride,
    /// The user's global default persona.
    UserDefault,
    /// The personality's own template reference.
    Personality,
    /// The system-wide default from config.
    SystemDefault,
}

impl ConfigSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UserOverride => "user_override",
            Self::UserDefault => "user_default",
            Self::Personality => "personality",
            Self::SystemDefault => "system_default",
        }
    }
}

/// Per-section report within one context build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionReport {
    pub label: String,
    pub raw_chars: usize,
    pub injected_chars: usize,
    pub truncated: bool,
    pub truncated_total_cap: bool,
    pub included: bool,
}

/// Full report of a context build, logged with `ContextBuilt` and exposed
/// on the job record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextReport {
    pub persona_source: ConfigSource,
    pub system_prompt_source: ConfigSource,
    pub llm_settings_source: ConfigSource,
    pub participants: usize,
    pub history_entries: usize,
    pub memory_snippets: usize,
    pub memory_degraded: bool,
    pub sections: Vec<SectionReport>,
    /// Length of the assembled system message.
    pub total_chars: usize,
}
