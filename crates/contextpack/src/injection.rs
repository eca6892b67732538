//! Delimited section formats for the assembled system message.
//!
//! Every block opens with `=== NAME ===` and is machine-inspectable, so a
//! rendered prompt can be checked section by section in tests and logs.

use chrono::{DateTime, Utc};

/// The resolved system prompt.
pub fn format_system_prompt(content: &str, source: &str) -> String {
    format!(
        "\
=== SYSTEM_PROMPT ===
SOURCE: {source}
--- BEGIN ---
{content}
--- END ---
"
    )
}

/// The personality's character block, one labelled line group per field.
pub fn format_character(display_name: &str, fields: &[(&str, String)]) -> String {
    let mut body = String::new();
    for (label, value) in fields {
        body.push_str(label);
        body.push_str(":\n");
        body.push_str(value);
        body.push('\n');
    }
    format!(
        "\
=== CHARACTER: {display_name} ===
--- BEGIN ---
{body}--- END ---
"
    )
}

/// Header fields for one participant block.
pub struct ParticipantHeader<'a> {
    pub persona_id: &'a str,
    pub addressed_as: &'a str,
    pub name: &'a str,
    pub pronouns: Option<&'a str>,
    pub active: bool,
    pub truncated: bool,
}

/// One conversation participant. Emitted once per distinct persona.
pub fn format_participant(header: &ParticipantHeader<'_>, content: &str) -> String {
    let ParticipantHeader {
        persona_id,
        addressed_as,
        name,
        pronouns,
        active,
        truncated,
    } = header;
    let pronouns = pronouns.unwrap_or("unspecified");
    format!(
        "\
=== PARTICIPANT: {addressed_as} ===
PERSONA_ID: {persona_id}
NAME: {name}
PRONOUNS: {pronouns}
ACTIVE: {active}
TRUNCATED: {truncated}
--- BEGIN ---
{content}
--- END ---
"
    )
}

/// One recalled memory snippet.
pub fn format_memory(persona_id: &str, score: f32, timestamp: DateTime<Utc>, content: &str) -> String {
    let timestamp = timestamp.to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    format!(
        "\
=== MEMORY ===
PERSONA_ID: {persona_id}
SCORE: {score:.3}
TIMESTAMP: {timestamp}
--- BEGIN ---
{content}
--- END ---
"
    )
}

/// Placeholder when the vector store could not be reached.
pub fn format_memory_unavailable() -> String {
    "\
=== MEMORY ===
UNAVAILABLE: true
=== END_MEMORY ===
"
    .to_string()
}
