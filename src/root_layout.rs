use crate::drive_ops::DriveOperations;
use crate::error::{Result, SyncError};
use crate::sync_state::write_atomic;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const ROOT_FOLDER_NAME: &str = "NoteCore Sync";
const NOTES_FOLDER_NAME: &str = "notes";
const MANIFEST_FILE_NAME: &str = "noteList.json";

/// Cached remote folder/file ids, persisted to disk so a fresh launch
/// doesn't have to re-resolve the remote layout from scratch.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RootLayout {
    pub root_folder_id: Option<String>,
    pub notes_folder_id: Option<String>,
    pub manifest_file_id: Option<String>,
}

impl RootLayout {
    pub fn load(path: &Path) -> Self {
        std::fs::read_to_string(path).ok().and_then(|s| serde_json::from_str(&s).ok()).unwrap_or_default()
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        write_atomic(path, &serde_json::to_string_pretty(self).unwrap())
    }
}

/// Generic "find-or-create a named folder under a parent" helper.
/// Folders are identified by exact-name query, never by id reuse
/// across installs.
async fn get_or_create_subfolder(drive: &Arc<dyn DriveOperations>, name: &str, parent_id: &str) -> Result<String> {
    let query = format!("name = '{}' and '{}' in parents and mimeType = 'application/vnd.google-apps.folder' and trashed = false", name, parent_id);
    let existing = drive.list_files(&query).await?;
    if let Some(folder) = existing.into_iter().next() {
        return Ok(folder.id);
    }
    drive.create_folder(name, parent_id).await
}

async fn get_or_create_root_folder(drive: &Arc<dyn DriveOperations>) -> Result<String> {
    let query = format!("name = '{}' and 'root' in parents and mimeType = 'application/vnd.google-apps.folder' and trashed = false", ROOT_FOLDER_NAME);
    let existing = drive.list_files(&query).await?;
    if let Some(folder) = existing.into_iter().next() {
        return Ok(folder.id);
    }
    drive.create_folder(ROOT_FOLDER_NAME, "root").await
}

/// Look for an existing manifest at root, without creating one — a
/// missing manifest is a legitimate first-run state, not an error.
async fn find_manifest_file(drive: &Arc<dyn DriveOperations>, root_id: &str) -> Result<Option<String>> {
    let query = format!("name = '{}' and '{}' in parents and trashed = false", MANIFEST_FILE_NAME, root_id);
    let existing = drive.list_files(&query).await?;
    Ok(existing.into_iter().next().map(|f| f.id))
}

/// Resolve (and cache) the root folder, notes folder, and an existing
/// manifest file, creating the folders on first run. The manifest file
/// is discovered, never created here, so a second device converges on
/// the one already written by the first.
pub async fn ensure_layout(drive: &Arc<dyn DriveOperations>, cache_path: &Path) -> Result<RootLayout> {
    let mut layout = RootLayout::load(cache_path);

    if layout.root_folder_id.is_none() {
        layout.root_folder_id = Some(get_or_create_root_folder(drive).await?);
    }
    let root_id = layout.root_folder_id.clone().unwrap();

    if layout.notes_folder_id.is_none() {
        layout.notes_folder_id = Some(get_or_create_subfolder(drive, NOTES_FOLDER_NAME, &root_id).await?);
    }

    if layout.manifest_file_id.is_none() {
        layout.manifest_file_id = find_manifest_file(drive, &root_id).await?;
    }

    layout.save(cache_path).map_err(|e| SyncError::Fatal(e.to_string()))?;
    Ok(layout)
}

pub fn default_cache_path(app_data_dir: &Path) -> PathBuf {
    app_data_dir.join("root_layout.json")
}
