use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Prompt context caps
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-section character caps applied while assembling the system message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    #[serde(default = "d_8000")]
    pub system_prompt_max_chars: usize,
    #[serde(default = "d_6000")]
    pub character_max_chars: usize,
    /// Cap for each participant's persona block.
    #[serde(default = "d_2000")]
    pub persona_max_chars: usize,
    /// Cap for each recalled memory snippet.
    #[serde(default = "d_1000")]
    pub memory_snippet_max_chars: usize,
    /// Cap for the whole memory section.
    #[serde(default = "d_6000")]
    pub memory_total_max_chars: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            system_prompt_max_chars: d_8000(),
            character_max_chars: d_6000(),
            persona_max_chars: d_2000(),
            memory_snippet_max_chars: d_1000(),
            memory_total_max_chars: d_6000(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_8000() -> usize {
    8_000
}
fn d_6000() -> usize {
    6_000
}
fn d_2000() -> usize {
    2_000
}
fn d_1000() -> usize {
    1_000
}
