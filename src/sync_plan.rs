use crate::manifest::NoteList;
use crate::note::is_modified_time_after;
use serde::Serialize;
use std::collections::HashMap;

/// Read-only classification of one note's local/cloud relationship,
/// for UI reporting only — not consulted by the reconciliation
/// algorithm itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FileStatus {
    Synced,
    LocalModified,
    CloudModified,
    Conflict,
    NewLocal,
    NewCloud,
    DeletedLocal,
    DeletedCloud,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileState {
    pub id: String,
    pub status: FileStatus,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncPlan {
    pub files: Vec<FileState>,
}

impl SyncPlan {
    pub fn has_conflicts(&self) -> bool {
        self.files.iter().any(|f| f.status == FileStatus::Conflict)
    }

    pub fn is_empty(&self) -> bool {
        self.files.iter().all(|f| f.status == FileStatus::Synced)
    }

    pub fn total_actions(&self) -> usize {
        self.files.iter().filter(|f| f.status != FileStatus::Synced).count()
    }
}

/// Diff a local manifest against a cloud manifest and a set of ids
/// pending local deletion, purely for display. A lightweight view
/// used for read-only UI reporting, separate from the manifest that
/// drives reconciliation.
pub fn build_sync_plan(local: &NoteList, cloud: &NoteList, locally_deleted: &[String]) -> SyncPlan {
    let local_by_id: HashMap<&str, _> = local.notes.iter().map(|n| (n.id.as_str(), n)).collect();
    let cloud_by_id: HashMap<&str, _> = cloud.notes.iter().map(|n| (n.id.as_str(), n)).collect();
    let deleted: std::collections::HashSet<&str> = locally_deleted.iter().map(|s| s.as_str()).collect();

    let mut ids: Vec<&str> = local_by_id.keys().chain(cloud_by_id.keys()).copied().collect();
    ids.sort_unstable();
    ids.dedup();

    let files = ids
        .into_iter()
        .map(|id| {
            let status = match (local_by_id.get(id), cloud_by_id.get(id)) {
                (Some(_), _) if deleted.contains(id) => FileStatus::DeletedLocal,
                (Some(l), Some(c)) => {
                    if l.content_hash == c.content_hash {
                        FileStatus::Synced
                    } else if is_modified_time_after(&l.modified_time, &c.modified_time)
                        && is_modified_time_after(&c.modified_time, &l.modified_time)
                    {
                        FileStatus::Conflict
                    } else if is_modified_time_after(&l.modified_time, &c.modified_time) {
                        FileStatus::LocalModified
                    } else {
                        FileStatus::CloudModified
                    }
                }
                (Some(_), None) => FileStatus::NewLocal,
                (None, Some(_)) => FileStatus::NewCloud,
                (None, None) => FileStatus::DeletedCloud,
            };
            FileState { id: id.to_string(), status }
        })
        .collect();

    SyncPlan { files }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::note::NoteMetadata;

    fn meta(id: &str, hash: &str, modified: &str) -> NoteMetadata {
        NoteMetadata {
            id: id.to_string(),
            title: "t".to_string(),
            content_header: String::new(),
            language: "plaintext".to_string(),
            modified_time: modified.to_string(),
            archived: false,
            content_hash: hash.to_string(),
            order: 0,
            folder_id: None,
        }
    }

    #[test]
    fn identical_hash_is_synced() {
        let local = NoteList { notes: vec![meta("a", "h", "2025-01-01T00:00:00Z")], ..Default::default() };
        let cloud = NoteList { notes: vec![meta("a", "h", "2025-01-01T00:00:00Z")], ..Default::default() };
        let plan = build_sync_plan(&local, &cloud, &[]);
        assert!(plan.is_empty());
        assert!(!plan.has_conflicts());
    }

    #[test]
    fn newer_local_is_local_modified() {
        let local = NoteList { notes: vec![meta("a", "h2", "2025-02-01T00:00:00Z")], ..Default::default() };
        let cloud = NoteList { notes: vec![meta("a", "h1", "2025-01-01T00:00:00Z")], ..Default::default() };
        let plan = build_sync_plan(&local, &cloud, &[]);
        assert_eq!(plan.files[0].status, FileStatus::LocalModified);
    }

    #[test]
    fn missing_from_cloud_is_new_local() {
        let local = NoteList { notes: vec![meta("a", "h", "2025-01-01T00:00:00Z")], ..Default::default() };
        let cloud = NoteList::default();
        let plan = build_sync_plan(&local, &cloud, &[]);
        assert_eq!(plan.files[0].status, FileStatus::NewLocal);
        assert_eq!(plan.total_actions(), 1);
    }

    #[test]
    fn locally_deleted_wins_over_hash_diff() {
        let local = NoteList { notes: vec![meta("a", "h", "2025-01-01T00:00:00Z")], ..Default::default() };
        let cloud = NoteList { notes: vec![meta("a", "h-other", "2025-01-01T00:00:00Z")], ..Default::default() };
        let plan = build_sync_plan(&local, &cloud, &["a".to_string()]);
        assert_eq!(plan.files[0].status, FileStatus::DeletedLocal);
    }
}
