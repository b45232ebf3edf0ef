use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A single note. Identity is `id`; `modified_time` carries a timezone
/// and must be compared as a parsed instant, never lexicographically,
/// except as a fallback when parsing fails.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub content_header: String,
    pub language: String,
    pub modified_time: String,
    #[serde(default)]
    pub archived: bool,
    pub content_hash: String,
}

impl Note {
    /// Build a note, computing `content_hash` as a sha-256 over
    /// body+title+language.
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
        language: impl Into<String>,
        modified_time: impl Into<String>,
    ) -> Self {
        let title = title.into();
        let content = content.into();
        let language = language.into();
        let content_header = header_snippet(&content);
        let content_hash = compute_content_hash(&content, &title, &language);
        Self {
            id: id.into(),
            title,
            content,
            content_header,
            language,
            modified_time: modified_time.into(),
            archived: false,
            content_hash,
        }
    }

    /// Recompute and store `content_hash`. Call after mutating
    /// `title`/`content`/`language` directly.
    pub fn refresh_hash(&mut self) {
        self.content_hash = compute_content_hash(&self.content, &self.title, &self.language);
        self.content_header = header_snippet(&self.content);
    }

    pub fn metadata(&self, order: i64, folder_id: Option<String>) -> NoteMetadata {
        NoteMetadata {
            id: self.id.clone(),
            title: self.title.clone(),
            content_header: self.content_header.clone(),
            language: self.language.clone(),
            modified_time: self.modified_time.clone(),
            archived: self.archived,
            content_hash: self.content_hash.clone(),
            order,
            folder_id,
        }
    }
}

/// Projection of a `Note` without its body, as carried in the manifest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NoteMetadata {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub content_header: String,
    pub language: String,
    pub modified_time: String,
    #[serde(default)]
    pub archived: bool,
    pub content_hash: String,
    #[serde(skip_serializing, default)]
    pub order: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
}

pub fn compute_content_hash(content: &str, title: &str, language: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hasher.update(title.as_bytes());
    hasher.update(language.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn header_snippet(content: &str) -> String {
    content.lines().next().unwrap_or("").chars().take(80).collect()
}

/// Parsed-instant comparison with lexicographic fallback. Equal
/// instants in different timezones are NOT "after" each other in
/// either direction.
pub fn is_modified_time_after(a: &str, b: &str) -> bool {
    match (DateTime::parse_from_rfc3339(a), DateTime::parse_from_rfc3339(b)) {
        (Ok(ta), Ok(tb)) => ta.with_timezone(&Utc) > tb.with_timezone(&Utc),
        _ => a > b,
    }
}

/// True iff `a` and `b` parse to the same instant (used to detect the
/// "equal instant, different zone" case).
pub fn is_modified_time_equal(a: &str, b: &str) -> bool {
    match (DateTime::parse_from_rfc3339(a), DateTime::parse_from_rfc3339(b)) {
        (Ok(ta), Ok(tb)) => ta.with_timezone(&Utc) == tb.with_timezone(&Utc),
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_note() {
        let note = Note::new("a", "T", "body", "plaintext", "2025-06-15T12:00:00Z");
        let json = serde_json::to_string(&note).unwrap();
        let decoded: Note = serde_json::from_str(&json).unwrap();
        assert_eq!(note, decoded);
    }

    #[test]
    fn equal_instants_different_zones_are_not_after() {
        let a = "2025-06-15T12:00:00Z";
        let b = "2025-06-15T14:00:00+02:00"; // same instant
        assert!(is_modified_time_equal(a, b));
        assert!(!is_modified_time_after(a, b));
        assert!(!is_modified_time_after(b, a));
    }

    #[test]
    fn later_instant_is_after() {
        let earlier = "2025-06-15T12:00:00Z";
        let later = "2025-06-15T13:00:00Z";
        assert!(is_modified_time_after(later, earlier));
        assert!(!is_modified_time_after(earlier, later));
    }

    #[test]
    fn falls_back_to_lexicographic_on_parse_failure() {
        assert!(is_modified_time_after("not-a-date-b", "not-a-date-a"));
    }

    #[test]
    fn content_hash_changes_with_body() {
        let mut note = Note::new("a", "T", "body", "plaintext", "2025-06-15T12:00:00Z");
        let original_hash = note.content_hash.clone();
        note.content = "changed".to_string();
        note.refresh_hash();
        assert_ne!(original_hash, note.content_hash);
    }
}
