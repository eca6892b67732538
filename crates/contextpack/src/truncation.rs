//! Section caps. All limits and counts are in characters, not bytes.

/// A prompt section being accumulated before rendering.
#[derive(Debug, Clone)]
pub struct Section {
    pub label: String,
    pub content: String,
    pub raw_chars: usize,
    pub truncated: bool,
    pub truncated_total_cap: bool,
    pub included: bool,
}

impl Section {
    /// Normalize line endings and apply the per-section cap.
    pub fn capped(label: impl Into<String>, raw: &str, max_chars: usize) -> Self {
        let normalized = raw.replace("\r\n", "\n");
        let (content, truncated) = truncate_section(normalized.trim(), max_chars);
        Self {
            label: label.into(),
            content,
            raw_chars: raw.chars().count(),
            truncated,
            truncated_total_cap: false,
            included: true,
        }
    }
}

/// Per-section truncation.
///
/// If `content` is longer than `max_chars` characters, keep the first
/// `max_chars` and append `\n[TRUNCATED]`.
pub fn truncate_section(content: &str, max_chars: usize) -> (String, bool) {
    let head = char_prefix(content, max_chars);
    if head.len() == content.len() {
        return (content.to_string(), false);
    }
    (format!("{head}\n[TRUNCATED]"), true)
}

/// Apply a total cap across sections in order. The section that crosses
/// the cap is cut; everything after it is dropped.
pub fn apply_total_cap(sections: &mut [Section], total_max_chars: usize) {
    let mut accumulated: usize = 0;

    for section in sections.iter_mut() {
        if !section.included {
            continue;
        }

        let section_chars = section.content.chars().count();

        if accumulated + section_chars <= total_max_chars {
            accumulated += section_chars;
        } else if accumulated < total_max_chars {
            let head = char_prefix(&section.content, total_max_chars - accumulated);
            section.content = format!("{head}\n[TRUNCATED_TOTAL_CAP]");
            section.truncated_total_cap = true;
            accumulated = total_max_chars;
        } else {
            section.content.clear();
            section.included = false;
        }
    }
}

/// The first `n` characters of `s`.
fn char_prefix(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((byte, _)) => &s[..byte],
        None => s,
    }
}
