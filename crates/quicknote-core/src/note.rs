use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Title used when the content yields nothing usable.
pub const UNTITLED: &str = "Untitled note";

/// Maximum title length, in characters.
pub const TITLE_MAX_CHARS: usize = 30;

/// Maximum preview length, in characters.
pub const PREVIEW_MAX_CHARS: usize = 100;

/// A full note with all fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: String,
    pub title: String,
    pub content: String,
    pub created_at: String,
    pub updated_at: String,
}

/// A list entry for a note (no full content).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteSummary {
    pub id: String,
    pub title: String,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub preview: String,
}

impl Note {
    /// Build a fresh note; both timestamps are equal.
    pub fn new(id: String, content: String, now: String) -> Self {
        Self {
            id,
            title: extract_title(&content),
            content,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// Replace the content, re-deriving the title and refreshing `updated_at`.
    pub fn set_content(&mut self, content: String, now: String) {
        self.title = extract_title(&content);
        self.content = content;
        self.updated_at = now;
    }

    /// Project to the list-resident summary.
    pub fn to_summary(&self) -> NoteSummary {
        NoteSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            created_at: self.created_at.clone(),
            updated_at: self.updated_at.clone(),
            preview: make_preview(&self.content),
        }
    }
}

impl NoteSummary {
    /// Bring the summary in line with a rewritten note. Position in the list is untouched.
    pub fn refresh_from(&mut self, note: &Note) {
        self.title = note.title.clone();
        self.updated_at = note.updated_at.clone();
        self.preview = make_preview(&note.content);
    }

    /// Case-insensitive substring match against title or preview.
    /// `needle` must already be lowercased.
    pub fn matches(&self, needle: &str) -> bool {
        self.title.to_lowercase().contains(needle) || self.preview.to_lowercase().contains(needle)
    }
}

/// Derive a title from note content.
///
/// Takes the first line, strips a leading run of `#` heading markers and the
/// whitespace after them, and keeps at most [`TITLE_MAX_CHARS`] characters.
/// Blank content, or a line that is nothing but heading markers, yields
/// [`UNTITLED`]. Never returns an empty string.
pub fn extract_title(content: &str) -> String {
    if content.trim().is_empty() {
        return UNTITLED.to_string();
    }

    let first_line = content.split('\n').next().unwrap_or_default().trim();
    let clean = if first_line.starts_with('#') {
        first_line.trim_start_matches('#').trim_start()
    } else {
        first_line
    };

    let title: String = clean.chars().take(TITLE_MAX_CHARS).collect();
    if title.is_empty() {
        UNTITLED.to_string()
    } else {
        title
    }
}

/// First [`PREVIEW_MAX_CHARS`] characters of the content, verbatim.
pub fn make_preview(content: &str) -> String {
    content.chars().take(PREVIEW_MAX_CHARS).collect()
}

/// Millisecond timestamp followed by random entropy, e.g. `1767225600000-3f9a0c21b`.
pub fn generate_id() -> String {
    let entropy = Uuid::new_v4().simple().to_string();
    format!("{}-{}", Utc::now().timestamp_millis(), &entropy[..9])
}

/// Current time as an ISO 8601 string with millisecond precision.
pub fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
