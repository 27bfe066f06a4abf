//! Evidence pointers for confidence components.
//!
//! Evidence names the artifact it was taken from, the char span inside that
//! artifact, and a short excerpt. Excerpts of PII hits are redacted.

use serde::{Deserialize, Serialize};

/// A pointer into a run artifact supporting a component or gate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Evidence {
    /// Artifact name (e.g. "llm_response", "retrieved_sources")
    pub artifact: String,

    /// Location within the artifact (e.g. "llm_response[47:72]")
    pub pointer: String,

    pub excerpt: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Evidence {
    /// Evidence over a byte span of a text artifact.
    pub fn span(artifact: impl Into<String>, text: &str, start: usize, end: usize) -> Self {
        let artifact = artifact.into();
        let end = end.min(text.len());
        let start = start.min(end);
        Self {
            pointer: format!("{}[{}:{}]", artifact, start, end),
            excerpt: text.get(start..end).unwrap_or_default().to_string(),
            artifact,
            note: None,
        }
    }

    /// Evidence over a whole artifact, with a free-form excerpt.
    pub fn whole(artifact: impl Into<String>, excerpt: impl Into<String>) -> Self {
        let artifact = artifact.into();
        Self {
            pointer: artifact.clone(),
            excerpt: excerpt.into(),
            artifact,
            note: None,
        }
    }

    /// Replace the excerpt with a redaction marker. The pointer is kept.
    pub fn redacted(mut self) -> Self {
        self.excerpt = "[REDACTED]".to_string();
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Find `keyword` case-insensitively and return the surrounding window.
///
/// The window spans `before` chars ahead of the match and `after` chars from
/// its start. Returns the byte span of the window alongside.
pub fn keyword_window(
    text: &str,
    keyword: &str,
    before: usize,
    after: usize,
) -> Option<(usize, usize)> {
    // ASCII lowercase keeps byte offsets aligned with `text`
    let haystack = text.to_ascii_lowercase();
    let needle = keyword.to_ascii_lowercase();
    let at = haystack.find(&needle)?;

    let start = text[..at]
        .char_indices()
        .rev()
        .nth(before.saturating_sub(1))
        .map(|(i, _)| i)
        .unwrap_or(0);
    let start = if before == 0 { at } else { start };

    let end = text[at..]
        .char_indices()
        .nth(after)
        .map(|(i, _)| at + i)
        .unwrap_or(text.len());

    Some((start, end))
}
