use crate::error::{Result, SyncError};
use crate::manifest::{migrate_v1_to_v2, NoteList, NoteListV1};
use crate::note::Note;
use crate::sync_state::write_atomic;
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};

/// Local repository abstraction consumed by `SyncEngine` — a plain
/// storage collaborator, not a sync primitive itself.
pub trait NoteStore: Send + Sync {
    fn load(&self, id: &str) -> Result<Note>;
    fn save(&self, note: &Note) -> Result<()>;
    fn delete(&self, id: &str) -> Result<()>;
    fn list_metadata(&self) -> Result<Vec<Note>>;
    fn load_manifest(&self) -> Result<NoteList>;
    fn save_manifest(&self, manifest: &NoteList) -> Result<()>;
    /// Run the v1->v2 migration if `noteList.json` exists and
    /// `noteList_v2.json` does not. Returns `true` if a migration ran.
    fn migrate_if_needed(&self) -> Result<bool>;
}

/// Filesystem-backed `NoteStore`, rooted at a plain directory so it
/// has no dependency on Tauri's path resolution.
pub struct FsNoteStore {
    root: PathBuf,
}

impl FsNoteStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn notes_dir(&self) -> PathBuf {
        self.root.join("notes")
    }

    fn note_path(&self, id: &str) -> PathBuf {
        self.notes_dir().join(format!("{}.json", id))
    }

    fn manifest_v2_path(&self) -> PathBuf {
        self.root.join("noteList_v2.json")
    }

    fn manifest_v1_path(&self) -> PathBuf {
        self.root.join("noteList.json")
    }

    fn snapshots_dir(&self) -> PathBuf {
        self.root.join("snapshots")
    }
}

impl NoteStore for FsNoteStore {
    fn load(&self, id: &str) -> Result<Note> {
        let path = self.note_path(id);
        let content = fs::read_to_string(&path).map_err(|_| SyncError::NotFound(id.to_string()))?;
        serde_json::from_str(&content).map_err(|e| SyncError::Corrupt(format!("note {}: {}", id, e)))
    }

    fn save(&self, note: &Note) -> Result<()> {
        fs::create_dir_all(self.notes_dir()).map_err(|e| SyncError::Fatal(e.to_string()))?;
        let content = serde_json::to_string_pretty(note).map_err(|e| SyncError::Fatal(e.to_string()))?;
        write_atomic(&self.note_path(&note.id), &content).map_err(|e| SyncError::Fatal(e.to_string()))
    }

    fn delete(&self, id: &str) -> Result<()> {
        let path = self.note_path(id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SyncError::Fatal(e.to_string())),
        }
    }

    fn list_metadata(&self) -> Result<Vec<Note>> {
        let dir = self.notes_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&dir).map_err(|e| SyncError::Fatal(e.to_string()))?;
        let mut notes = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) == Some("json") {
                if let Ok(content) = fs::read_to_string(&path) {
                    if let Ok(note) = serde_json::from_str::<Note>(&content) {
                        notes.push(note);
                    }
                }
            }
        }
        Ok(notes)
    }

    fn load_manifest(&self) -> Result<NoteList> {
        let path = self.manifest_v2_path();
        if !path.exists() {
            return Ok(NoteList::default());
        }
        let content = fs::read_to_string(&path).map_err(|e| SyncError::Fatal(e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| SyncError::Corrupt(format!("manifest: {}", e)))
    }

    fn save_manifest(&self, manifest: &NoteList) -> Result<()> {
        let content = serde_json::to_string_pretty(manifest).map_err(|e| SyncError::Fatal(e.to_string()))?;
        write_atomic(&self.manifest_v2_path(), &content).map_err(|e| SyncError::Fatal(e.to_string()))
    }

    fn migrate_if_needed(&self) -> Result<bool> {
        let v1_path = self.manifest_v1_path();
        let v2_path = self.manifest_v2_path();
        if !v1_path.exists() || v2_path.exists() {
            return Ok(false);
        }

        let content = fs::read_to_string(&v1_path).map_err(|e| SyncError::Fatal(e.to_string()))?;
        let v1: NoteListV1 =
            serde_json::from_str(&content).map_err(|e| SyncError::Corrupt(format!("v1 manifest: {}", e)))?;

        snapshot_v1(&self.snapshots_dir(), &v1_path)?;

        let v2 = migrate_v1_to_v2(v1);
        self.save_manifest(&v2)?;
        log::info!("migrated noteList.json (v1) to noteList_v2.json ({} notes)", v2.notes.len());
        Ok(true)
    }
}

/// Snapshot the pre-migration v1 file under `snapshots/` with a
/// timestamped name before rewriting it.
fn snapshot_v1(snapshots_dir: &Path, v1_path: &Path) -> Result<()> {
    fs::create_dir_all(snapshots_dir).map_err(|e| SyncError::Fatal(e.to_string()))?;
    let stamp = Utc::now().format("%Y%m%d-%H%M%S");
    let dest = snapshots_dir.join(format!("noteList_v1_{}.json", stamp));
    fs::copy(v1_path, dest).map_err(|e| SyncError::Fatal(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let store = FsNoteStore::new(dir.path());
        let note = Note::new("a", "T", "body", "plaintext", "2025-06-15T12:00:00Z");
        store.save(&note).unwrap();
        let loaded = store.load("a").unwrap();
        assert_eq!(note, loaded);
    }

    #[test]
    fn load_missing_note_is_not_found() {
        let dir = tempdir().unwrap();
        let store = FsNoteStore::new(dir.path());
        assert!(store.load("missing").unwrap_err().is_not_found());
    }

    #[test]
    fn delete_missing_note_is_not_an_error() {
        let dir = tempdir().unwrap();
        let store = FsNoteStore::new(dir.path());
        store.delete("missing").unwrap();
    }

    #[test]
    fn migration_snapshots_and_rewrites() {
        let dir = tempdir().unwrap();
        let store = FsNoteStore::new(dir.path());
        let v1 = serde_json::json!({
            "version": "1.0",
            "notes": [
                {"id": "a", "title": "A", "language": "plaintext", "modifiedTime": "2025-01-01T00:00:00Z", "archived": false, "contentHash": "h", "order": 0}
            ],
            "lastSync": "2025-01-01T00:00:00Z"
        });
        fs::write(dir.path().join("noteList.json"), serde_json::to_string(&v1).unwrap()).unwrap();

        let migrated = store.migrate_if_needed().unwrap();
        assert!(migrated);
        assert!(dir.path().join("noteList_v2.json").exists());
        assert!(dir.path().join("snapshots").read_dir().unwrap().count() == 1);

        // Second call is a no-op since noteList_v2.json now exists.
        assert!(!store.migrate_if_needed().unwrap());
    }
}
