use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Durable, on-disk dirty-set and last-synced marker. `revision` bumps
/// on every mutation and backs the optimistic `clear_if_unchanged`
/// check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncStateData {
    pub dirty: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_drive_ts: Option<String>,
    #[serde(default)]
    pub dirty_note_ids: HashSet<String>,
    #[serde(default)]
    pub deleted_note_ids: HashSet<String>,
    #[serde(default)]
    pub last_synced_note_hash: HashMap<String, String>,
    #[serde(default)]
    pub revision: u64,
}

impl Default for SyncStateData {
    fn default() -> Self {
        Self {
            dirty: false,
            last_synced_drive_ts: None,
            dirty_note_ids: HashSet::new(),
            deleted_note_ids: HashSet::new(),
            last_synced_note_hash: HashMap::new(),
            revision: 0,
        }
    }
}

/// A snapshot of the dirty set paired with the revision it was taken
/// at, used by `clear_if_unchanged` to detect a concurrent mutation.
#[derive(Debug, Clone)]
pub struct DirtySnapshot {
    pub dirty_note_ids: HashSet<String>,
    pub deleted_note_ids: HashSet<String>,
    pub revision: u64,
}

/// Thread-safe, disk-backed `SyncState`, holding its own mutex
/// independent of the engine's other locks.
pub struct SyncState {
    path: PathBuf,
    data: Mutex<SyncStateData>,
}

impl SyncState {
    pub fn load_or_default(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let data = if path.exists() {
            let content = fs::read_to_string(&path)?;
            serde_json::from_str(&content).unwrap_or_default()
        } else {
            SyncStateData::default()
        };
        Ok(Self { path, data: Mutex::new(data) })
    }

    fn persist(&self, data: &SyncStateData) -> io::Result<()> {
        write_atomic(&self.path, &serde_json::to_string_pretty(data)?)
    }

    pub fn mark_note_dirty(&self, id: &str) -> io::Result<()> {
        let mut data = self.data.lock().unwrap();
        data.dirty = true;
        data.dirty_note_ids.insert(id.to_string());
        data.deleted_note_ids.remove(id);
        data.revision += 1;
        self.persist(&data)
    }

    pub fn mark_note_deleted(&self, id: &str) -> io::Result<()> {
        let mut data = self.data.lock().unwrap();
        data.dirty = true;
        data.dirty_note_ids.remove(id);
        data.deleted_note_ids.insert(id.to_string());
        data.revision += 1;
        self.persist(&data)
    }

    pub fn mark_dirty(&self) -> io::Result<()> {
        let mut data = self.data.lock().unwrap();
        data.dirty = true;
        data.revision += 1;
        self.persist(&data)
    }

    pub fn is_dirty(&self) -> bool {
        self.data.lock().unwrap().dirty
    }

    pub fn get_dirty_snapshot_with_revision(&self) -> DirtySnapshot {
        let data = self.data.lock().unwrap();
        DirtySnapshot {
            dirty_note_ids: data.dirty_note_ids.clone(),
            deleted_note_ids: data.deleted_note_ids.clone(),
            revision: data.revision,
        }
    }

    pub fn last_synced_note_hash(&self, id: &str) -> Option<String> {
        self.data.lock().unwrap().last_synced_note_hash.get(id).cloned()
    }

    /// Commit a successful sync pass only if `revision` is unchanged
    /// since `rev` was snapshotted; otherwise a concurrent mutation
    /// happened and the caller must re-sync.
    pub fn clear_dirty_if_unchanged(
        &self,
        rev: u64,
        drive_ts: Option<String>,
        hashes: HashMap<String, String>,
    ) -> io::Result<bool> {
        let mut data = self.data.lock().unwrap();
        if data.revision != rev {
            return Ok(false);
        }
        data.dirty = false;
        data.dirty_note_ids.clear();
        data.deleted_note_ids.clear();
        data.last_synced_drive_ts = drive_ts;
        data.last_synced_note_hash.extend(hashes);
        self.persist(&data)?;
        Ok(true)
    }
}

/// Write-temp-then-rename so a crash mid-write can never leave a
/// truncated file on disk.
pub fn write_atomic(path: &Path, content: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension(match path.extension() {
        Some(ext) => format!("{}.tmp", ext.to_string_lossy()),
        None => "tmp".to_string(),
    });
    fs::write(&tmp_path, content)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}
