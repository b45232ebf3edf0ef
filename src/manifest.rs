use crate::note::{is_modified_time_after, NoteMetadata};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const MANIFEST_VERSION: &str = "2.0";

/// A folder entry in the v2 manifest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FolderMetadata {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived: Option<bool>,
}

/// An entry in `topLevelOrder`/`archivedTopLevelOrder` — a note or a
/// folder, referenced by id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OrderEntry {
    Note { id: String },
    Folder { id: String },
}

impl OrderEntry {
    pub fn id(&self) -> &str {
        match self {
            OrderEntry::Note { id } | OrderEntry::Folder { id } => id,
        }
    }
}

/// The v2 note-list manifest. Order is implicit in list position;
/// there is no `order` field on a v2 note.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NoteList {
    pub version: String,
    pub notes: Vec<NoteMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folders: Option<Vec<FolderMetadata>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_level_order: Option<Vec<OrderEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived_top_level_order: Option<Vec<OrderEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collapsed_folder_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_client_id: Option<String>,
}

impl Default for NoteList {
    fn default() -> Self {
        Self {
            version: MANIFEST_VERSION.to_string(),
            notes: Vec::new(),
            folders: None,
            top_level_order: None,
            archived_top_level_order: None,
            collapsed_folder_ids: None,
            last_sync_client_id: None,
        }
    }
}

impl NoteList {
    /// Order each note by its position in `notes`, assigning `order`
    /// from list position (v2 has no on-disk `order` field).
    pub fn assign_implicit_order(&mut self) {
        for (idx, note) in self.notes.iter_mut().enumerate() {
            note.order = idx as i64;
        }
    }

    /// Drop any order-list entry referencing an id absent from both
    /// `notes` and `folders`, logging what was dropped.
    pub fn validate_order_lists(&mut self) {
        let known_ids: std::collections::HashSet<&str> = self
            .notes
            .iter()
            .map(|n| n.id.as_str())
            .chain(self.folders.iter().flatten().map(|f| f.id.as_str()))
            .collect();

        for list in [&mut self.top_level_order, &mut self.archived_top_level_order] {
            if let Some(entries) = list {
                let before = entries.len();
                entries.retain(|e| known_ids.contains(e.id()));
                let dropped = before - entries.len();
                if dropped > 0 {
                    log::warn!("dropped {} unknown id(s) from order list", dropped);
                }
            }
        }
    }
}

/// Legacy v1 manifest shape: notes carried an explicit `order` field
/// and the manifest carried a single `last_sync` timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteListV1 {
    #[serde(default = "v1_version")]
    pub version: String,
    pub notes: Vec<NoteMetadataV1>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<String>,
}

fn v1_version() -> String {
    "1.0".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteMetadataV1 {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub content_header: String,
    pub language: String,
    pub modified_time: String,
    #[serde(default)]
    pub archived: bool,
    pub content_hash: String,
    #[serde(default)]
    pub order: i64,
}

/// One-way migration of a v1 manifest into v2. Order is now implicit:
/// notes are sorted by their v1 `order` field before
/// being placed into the v2 list, and the `order` field itself is
/// dropped from the output.
pub fn migrate_v1_to_v2(mut v1: NoteListV1) -> NoteList {
    v1.notes.sort_by_key(|n| n.order);
    let notes = v1
        .notes
        .into_iter()
        .enumerate()
        .map(|(idx, n)| NoteMetadata {
            id: n.id,
            title: n.title,
            content_header: n.content_header,
            language: n.language,
            modified_time: n.modified_time,
            archived: n.archived,
            content_hash: n.content_hash,
            order: idx as i64,
            folder_id: None,
        })
        .collect();

    NoteList {
        version: MANIFEST_VERSION.to_string(),
        notes,
        folders: None,
        top_level_order: None,
        archived_top_level_order: None,
        collapsed_folder_ids: None,
        last_sync_client_id: None,
    }
}

/// Group by id; within each group keep the most recently modified
/// entry (parsed instant, lexicographic fallback); sort the result by
/// `order`.
pub fn deduplicate_notes(metas: Vec<NoteMetadata>) -> Vec<NoteMetadata> {
    let mut by_id: HashMap<String, NoteMetadata> = HashMap::new();
    for meta in metas {
        match by_id.get(&meta.id) {
            Some(existing) if !is_modified_time_after(&meta.modified_time, &existing.modified_time) => {}
            _ => {
                by_id.insert(meta.id.clone(), meta);
            }
        }
    }
    let mut result: Vec<NoteMetadata> = by_id.into_values().collect();
    result.sort_by_key(|n| n.order);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(id: &str, modified: &str, order: i64) -> NoteMetadata {
        NoteMetadata {
            id: id.to_string(),
            title: "t".to_string(),
            content_header: String::new(),
            language: "plaintext".to_string(),
            modified_time: modified.to_string(),
            archived: false,
            content_hash: "h".to_string(),
            order,
            folder_id: None,
        }
    }

    #[test]
    fn dedupe_keeps_most_recent_and_sorts_by_order() {
        let metas = vec![
            meta("b", "2025-01-01T00:00:00Z", 1),
            meta("a", "2025-01-01T00:00:00Z", 0),
            meta("a", "2025-02-01T00:00:00Z", 2), // newer duplicate of "a"
        ];
        let result = deduplicate_notes(metas);
        assert_eq!(result.len(), 2);
        // "a" kept the newer (order 2) entry, so order-sort puts it after "b" (order 1)
        assert_eq!(result[0].id, "b");
        assert_eq!(result[1].id, "a");
        assert_eq!(result[1].modified_time, "2025-02-01T00:00:00Z");
    }

    #[test]
    fn dedupe_is_idempotent() {
        let metas = vec![meta("a", "2025-01-01T00:00:00Z", 0), meta("b", "2025-01-02T00:00:00Z", 1)];
        let once = deduplicate_notes(metas);
        let twice = deduplicate_notes(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn migration_preserves_note_count_and_order_drops_field() {
        let v1 = NoteListV1 {
            version: "1.0".to_string(),
            notes: vec![
                NoteMetadataV1 {
                    id: "b".to_string(),
                    title: "B".to_string(),
                    content_header: String::new(),
                    language: "plaintext".to_string(),
                    modified_time: "2025-01-01T00:00:00Z".to_string(),
                    archived: false,
                    content_hash: "hb".to_string(),
                    order: 1,
                },
                NoteMetadataV1 {
                    id: "a".to_string(),
                    title: "A".to_string(),
                    content_header: String::new(),
                    language: "plaintext".to_string(),
                    modified_time: "2025-01-01T00:00:00Z".to_string(),
                    archived: false,
                    content_hash: "ha".to_string(),
                    order: 0,
                },
            ],
            last_sync: Some("2025-01-01T00:00:00Z".to_string()),
        };
        let v2 = migrate_v1_to_v2(v1);
        assert_eq!(v2.notes.len(), 2);
        assert_eq!(v2.notes[0].id, "a");
        assert_eq!(v2.notes[1].id, "b");
        let json = serde_json::to_string(&v2).unwrap();
        assert!(!json.contains("\"order\""));
    }

    #[test]
    fn validate_order_lists_drops_unknown_ids() {
        let mut list = NoteList {
            notes: vec![meta("a", "2025-01-01T00:00:00Z", 0)],
            top_level_order: Some(vec![
                OrderEntry::Note { id: "a".to_string() },
                OrderEntry::Note { id: "ghost".to_string() },
            ]),
            ..Default::default()
        };
        list.validate_order_lists();
        assert_eq!(list.top_level_order.unwrap().len(), 1);
    }
}
