use crate::drive_ops::{DriveOperations, RemoteFile};
use crate::error::{Result, SyncError};
use crate::manifest::{deduplicate_notes, NoteList};
use crate::note::{is_modified_time_after, Note, NoteMetadata};
use crate::note_store::NoteStore;
use crate::operation_queue::{DriveOp, OpOutcome, OperationQueue};
use crate::retry;
use crate::status_sink::StatusSink;
use crate::sync_state::SyncState;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

const NOTE_MIME: &str = "application/json";

/// `noteID -> driveFileID` plus the manifest md5 short-circuit cache,
/// held behind one read/write mutex inside the engine.
#[derive(Default)]
struct EngineCache {
    file_ids: HashMap<String, String>,
    last_note_list_md5: Option<String>,
    last_good_manifest: Option<NoteList>,
}

/// Implements the per-entity sync primitives atop `OperationQueue`,
/// with retry policies, a file-id cache, and the manifest md5
/// short-circuit.
pub struct SyncEngine {
    drive: Arc<dyn DriveOperations>,
    queue: Arc<OperationQueue>,
    note_store: Arc<dyn NoteStore>,
    sync_state: Arc<SyncState>,
    status: Arc<dyn StatusSink>,
    root_folder_id: String,
    notes_folder_id: String,
    manifest_file_id: std::sync::Mutex<Option<String>>,
    client_id: String,
    cache: RwLock<EngineCache>,
}

impl SyncEngine {
    pub fn new(
        drive: Arc<dyn DriveOperations>,
        queue: Arc<OperationQueue>,
        note_store: Arc<dyn NoteStore>,
        sync_state: Arc<SyncState>,
        status: Arc<dyn StatusSink>,
        root_folder_id: impl Into<String>,
        notes_folder_id: impl Into<String>,
        client_id: impl Into<String>,
        manifest_file_id: Option<String>,
    ) -> Self {
        Self {
            drive,
            queue,
            note_store,
            sync_state,
            status,
            root_folder_id: root_folder_id.into(),
            notes_folder_id: notes_folder_id.into(),
            manifest_file_id: std::sync::Mutex::new(manifest_file_id),
            client_id: client_id.into(),
            cache: RwLock::new(EngineCache::default()),
        }
    }

    fn note_bytes(note: &Note) -> Result<Vec<u8>> {
        serde_json::to_vec(note).map_err(|e| SyncError::Fatal(e.to_string()))
    }

    fn cached_file_id(&self, note_id: &str) -> Option<String> {
        self.cache.read().unwrap().file_ids.get(note_id).cloned()
    }

    fn remember_file_id(&self, note_id: &str, file_id: &str) {
        self.cache.write().unwrap().file_ids.insert(note_id.to_string(), file_id.to_string());
    }

    fn forget_file_id(&self, note_id: &str) {
        self.cache.write().unwrap().file_ids.remove(note_id);
    }

    /// Lists the notes folder for the exact filename, using the
    /// `getFileID` retry profile since this is the path a missing file
    /// is expected to hit while a create is still propagating.
    async fn resolve_file_id(&self, note_id: &str) -> Result<String> {
        if let Some(id) = self.cached_file_id(note_id) {
            return Ok(id);
        }
        let query = format!("name = '{}.json' and '{}' in parents and trashed = false", note_id, self.notes_folder_id);
        let files = retry::retry(retry::GET_FILE_ID, || async {
            match self.queue.submit(DriveOp::List { query: query.clone() }).await? {
                OpOutcome::Listed(files) => Ok(files),
                _ => Err(SyncError::Fatal("unexpected outcome for List".to_string())),
            }
        })
        .await?;
        let file = files.into_iter().next().ok_or_else(|| SyncError::NotFound(note_id.to_string()))?;
        self.remember_file_id(note_id, &file.id);
        Ok(file.id)
    }

    pub async fn create_note(&self, note: &Note) -> Result<()> {
        let bytes = Self::note_bytes(note)?;
        let name = format!("{}.json", note.id);
        let outcome = retry::retry(retry::UPLOAD, || async {
            self.queue
                .submit(DriveOp::Create { name: name.clone(), bytes: bytes.clone(), parent_id: self.notes_folder_id.clone(), mime: NOTE_MIME.to_string() })
                .await
        })
        .await?;
        if let OpOutcome::Created(file_id) = outcome {
            self.remember_file_id(&note.id, &file_id);
        }
        Ok(())
    }

    /// Falls back to `create_note` on non-transient failure, and
    /// treats cancellation as success since a newer update superseded
    /// this one.
    pub async fn update_note(&self, note: &Note) -> Result<()> {
        let file_id = match self.resolve_file_id(&note.id).await {
            Ok(id) => id,
            Err(_) => return self.create_note(note).await,
        };
        let bytes = Self::note_bytes(note)?;
        let result = retry::retry(retry::UPLOAD, || async {
            self.queue.submit(DriveOp::Update { file_id: file_id.clone(), bytes: bytes.clone() }).await
        })
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(SyncError::Cancelled) => Ok(()),
            Err(_) => self.create_note(note).await,
        }
    }

    pub async fn delete_note(&self, id: &str) -> Result<()> {
        let file_id = match self.resolve_file_id(id).await {
            Ok(id) => id,
            Err(SyncError::NotFound(_)) => {
                self.forget_file_id(id);
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let result = retry::retry(retry::DEFAULT, || async { self.queue.submit(DriveOp::Delete { file_id: file_id.clone() }).await }).await;
        self.forget_file_id(id);
        match result {
            Ok(_) | Err(SyncError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub async fn download_note(&self, id: &str) -> Result<Note> {
        let file_id = self.resolve_file_id(id).await?;
        let bytes = retry::retry(retry::DOWNLOAD, || async {
            match self.queue.submit(DriveOp::Download { file_id: file_id.clone() }).await? {
                OpOutcome::Downloaded(bytes) => Ok(bytes),
                _ => Err(SyncError::Fatal("unexpected outcome for Download".to_string())),
            }
        })
        .await?;
        serde_json::from_slice(&bytes).map_err(|e| SyncError::Corrupt(format!("note {}: {}", id, e)))
    }

    /// Best-effort batch upload; one failure does not halt the rest.
    pub async fn upload_all_notes(&self, notes: &[Note]) -> usize {
        let mut errors = 0;
        for note in notes {
            if self.update_note(note).await.is_err() {
                errors += 1;
            }
        }
        errors
    }

    fn manifest_bytes(manifest: &NoteList) -> Result<Vec<u8>> {
        serde_json::to_vec(manifest).map_err(|e| SyncError::Fatal(e.to_string()))
    }

    /// Clears the manifest md5 cache on every upload, since it can
    /// never be falsely "unchanged" after a write of our own.
    pub async fn update_note_list(&self, manifest: &NoteList) -> Result<()> {
        let bytes = Self::manifest_bytes(manifest)?;
        let existing_id = self.manifest_file_id.lock().unwrap().clone();
        let outcome = if let Some(file_id) = existing_id {
            retry::retry(retry::UPLOAD, || async { self.queue.submit(DriveOp::Update { file_id: file_id.clone(), bytes: bytes.clone() }).await }).await?
        } else {
            retry::retry(retry::UPLOAD, || async {
                self.queue
                    .submit(DriveOp::Create { name: "noteList.json".to_string(), bytes: bytes.clone(), parent_id: self.root_folder_id.clone(), mime: NOTE_MIME.to_string() })
                    .await
            })
            .await?
        };
        if let OpOutcome::Created(file_id) = outcome {
            *self.manifest_file_id.lock().unwrap() = Some(file_id);
        }
        self.cache.write().unwrap().last_note_list_md5 = None;
        Ok(())
    }

    pub async fn create_note_list(&self, manifest: &NoteList) -> Result<()> {
        self.update_note_list(manifest).await
    }

    /// Full download with corruption fallback to the last cached good
    /// manifest. Always deduplicates notes before returning.
    pub async fn download_note_list(&self) -> Result<NoteList> {
        let file_id = self
            .manifest_file_id
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| SyncError::NotFound("noteList.json".to_string()))?;
        let bytes = retry::retry(retry::DOWNLOAD, || async {
            match self.queue.submit(DriveOp::Download { file_id: file_id.clone() }).await? {
                OpOutcome::Downloaded(bytes) => Ok(bytes),
                _ => Err(SyncError::Fatal("unexpected outcome for Download".to_string())),
            }
        })
        .await?;

        let mut manifest: NoteList = match serde_json::from_slice(&bytes) {
            Ok(m) => m,
            Err(e) => {
                log::warn!("manifest corrupt, falling back to last cached good copy: {}", e);
                return self.cache.read().unwrap().last_good_manifest.clone().ok_or(SyncError::Corrupt(e.to_string()));
            }
        };
        manifest.assign_implicit_order();
        manifest.notes = deduplicate_notes(manifest.notes);
        self.cache.write().unwrap().last_good_manifest = Some(manifest.clone());
        Ok(manifest)
    }

    /// md5 short-circuit: if the remote metadata's md5 matches the
    /// cached one, `download_note_list` is never called. Metadata
    /// failure falls back to a full download.
    pub async fn download_note_list_if_changed(&self) -> Result<Option<NoteList>> {
        let file_id = match self.manifest_file_id.lock().unwrap().clone() {
            Some(id) => id,
            None => return Ok(None),
        };
        match self.drive.get_file_metadata(&file_id).await {
            Ok(meta) => {
                let cached = self.cache.read().unwrap().last_note_list_md5.clone();
                if meta.md5_checksum.is_some() && meta.md5_checksum == cached {
                    return Ok(None);
                }
                let manifest = self.download_note_list().await?;
                self.cache.write().unwrap().last_note_list_md5 = meta.md5_checksum;
                Ok(Some(manifest))
            }
            Err(_) => self.download_note_list().await.map(Some),
        }
    }

    /// Rebuild `noteID -> driveFileID` from a single listing of the
    /// notes folder.
    pub async fn refresh_file_id_cache(&self) -> Result<()> {
        let files = self.list_notes_folder().await?;
        let mut cache = self.cache.write().unwrap();
        cache.file_ids.clear();
        for file in files {
            if let Some(id) = file.name.strip_suffix(".json") {
                cache.file_ids.insert(id.to_string(), file.id);
            }
        }
        Ok(())
    }

    async fn list_notes_folder(&self) -> Result<Vec<RemoteFile>> {
        let query = format!("'{}' in parents and trashed = false", self.notes_folder_id);
        retry::retry(retry::LIST, || async {
            match self.queue.submit(DriveOp::List { query: query.clone() }).await? {
                OpOutcome::Listed(files) => Ok(files),
                _ => Err(SyncError::Fatal("unexpected outcome for List".to_string())),
            }
        })
        .await
    }

    /// Group by note id (filename minus `.json`); keep the file with
    /// the latest `createdTime` in each group of size >1, delete the
    /// rest. Covers the case where a flaky create succeeded twice.
    pub async fn remove_duplicate_note_files(&self, files: Vec<RemoteFile>) -> Result<Vec<RemoteFile>> {
        let mut groups: HashMap<String, Vec<RemoteFile>> = HashMap::new();
        for file in files {
            let id = file.name.trim_end_matches(".json").to_string();
            groups.entry(id).or_default().push(file);
        }

        let mut kept = Vec::new();
        for (_, mut group) in groups {
            if group.len() > 1 {
                group.sort_by(|a, b| a.created_time.cmp(&b.created_time));
                let winner = group.pop().unwrap();
                for loser in group {
                    let _ = retry::retry(retry::DEFAULT, || async { self.queue.submit(DriveOp::Delete { file_id: loser.id.clone() }).await }).await;
                }
                kept.push(winner);
            } else {
                kept.push(group.pop().unwrap());
            }
        }
        Ok(kept)
    }

    /// Files present on drive but absent from the manifest.
    pub async fn list_unknown_notes(&self, cloud_manifest: &NoteList, cloud_files: &[RemoteFile], download_bodies: bool) -> Result<Vec<NoteMetadata>> {
        let known: std::collections::HashSet<&str> = cloud_manifest.notes.iter().map(|n| n.id.as_str()).collect();
        let mut result = Vec::new();
        for (idx, file) in cloud_files.iter().enumerate() {
            let Some(id) = file.name.strip_suffix(".json") else { continue };
            if known.contains(id) {
                continue;
            }
            if download_bodies {
                let note = self.download_note(id).await?;
                result.push(note.metadata(idx as i64, None));
            } else {
                result.push(NoteMetadata {
                    id: id.to_string(),
                    title: String::new(),
                    content_header: String::new(),
                    language: String::new(),
                    modified_time: String::new(),
                    archived: false,
                    content_hash: String::new(),
                    order: idx as i64,
                    folder_id: None,
                });
            }
        }
        Ok(result)
    }

    /// Drop any manifest entry whose file has disappeared from drive.
    pub async fn list_available_notes(&self, cloud_manifest: &NoteList) -> Result<NoteList> {
        let files = self.list_notes_folder().await?;
        let present: std::collections::HashSet<String> = files.into_iter().filter_map(|f| f.name.strip_suffix(".json").map(str::to_string)).collect();
        let mut result = cloud_manifest.clone();
        result.notes.retain(|n| present.contains(&n.id));
        Ok(result)
    }

    pub fn deduplicate_notes(&self, metas: Vec<NoteMetadata>) -> Vec<NoteMetadata> {
        deduplicate_notes(metas)
    }

    /// Read-only pending-changes breakdown for the UI, independent of
    /// the manifest that actually drives reconciliation.
    pub async fn sync_plan(&self) -> Result<crate::sync_plan::SyncPlan> {
        let local = self.note_store.load_manifest()?;
        let cloud = match self.download_note_list_if_changed().await? {
            Some(m) => m,
            None => self.cache.read().unwrap().last_good_manifest.clone().unwrap_or_default(),
        };
        let deleted: Vec<String> = self.sync_state.get_dirty_snapshot_with_revision().deleted_note_ids.into_iter().collect();
        Ok(crate::sync_plan::build_sync_plan(&local, &cloud, &deleted))
    }

    /// The full-sync algorithm: short-circuit check, manifest
    /// download, file-id refresh, duplicate cleanup, three-way merge,
    /// manifest upload, and dirty-state clearing.
    pub async fn full_sync(&self) -> Result<()> {
        self.status.notify_status("syncing");
        let snapshot = self.sync_state.get_dirty_snapshot_with_revision();

        // Step 1: md5-unchanged + not-dirty short circuit.
        if !snapshot.dirty_note_ids.is_empty() || !snapshot.deleted_note_ids.is_empty() || self.sync_state.is_dirty() {
            // fall through to reconciliation
        } else if let Ok(meta) = self.current_manifest_metadata().await {
            let cached = self.cache.read().unwrap().last_note_list_md5.clone();
            if meta.md5_checksum.is_some() && meta.md5_checksum == cached {
                self.status.notify_status("synced");
                return Ok(());
            }
        }

        // Step 2.
        let cloud_manifest = match self.download_note_list_if_changed().await? {
            Some(m) => m,
            None => self.cache.read().unwrap().last_good_manifest.clone().unwrap_or_default(),
        };

        // Step 3.
        self.refresh_file_id_cache().await?;

        // Step 4.
        let raw_files = self.list_notes_folder().await?;
        let files = self.remove_duplicate_note_files(raw_files).await?;

        // Step 5: three-way merge.
        let local_manifest = self.note_store.load_manifest()?;
        let local_notes = self.note_store.list_metadata()?;
        let local_by_id: HashMap<&str, &Note> = local_notes.iter().map(|n| (n.id.as_str(), n)).collect();
        let cloud_by_id: HashMap<&str, &NoteMetadata> = cloud_manifest.notes.iter().map(|n| (n.id.as_str(), n)).collect();
        let present_remote: std::collections::HashSet<String> = files.iter().filter_map(|f| f.name.strip_suffix(".json").map(str::to_string)).collect();

        // Preserve the manifest's authoritative note order: local manifest
        // order first, then any cloud-only ids in cloud manifest order,
        // then ids that exist locally but appear in neither manifest yet.
        let mut all_ids: Vec<String> = Vec::new();
        let mut seen_ids: std::collections::HashSet<String> = std::collections::HashSet::new();
        for meta in &local_manifest.notes {
            if (local_by_id.contains_key(meta.id.as_str()) || cloud_by_id.contains_key(meta.id.as_str())) && seen_ids.insert(meta.id.clone()) {
                all_ids.push(meta.id.clone());
            }
        }
        for meta in &cloud_manifest.notes {
            if seen_ids.insert(meta.id.clone()) {
                all_ids.push(meta.id.clone());
            }
        }
        for id in local_by_id.keys() {
            if seen_ids.insert(id.to_string()) {
                all_ids.push(id.to_string());
            }
        }

        let mut merged_metas: Vec<NoteMetadata> = Vec::new();
        for id in &all_ids {
            if snapshot.deleted_note_ids.contains(id) {
                if let Some(file_id) = self.cached_file_id(id) {
                    let _ = retry::retry(retry::DEFAULT, || async { self.queue.submit(DriveOp::Delete { file_id: file_id.clone() }).await }).await;
                }
                continue;
            }
            match (local_by_id.get(id.as_str()), cloud_by_id.get(id.as_str())) {
                (Some(local), Some(cloud)) => {
                    if local.content_hash == cloud.content_hash {
                        merged_metas.push(local.metadata(cloud.order, cloud.folder_id.clone()));
                    } else {
                        let local_wins = if is_modified_time_after(&local.modified_time, &cloud.modified_time) {
                            true
                        } else if is_modified_time_after(&cloud.modified_time, &local.modified_time) {
                            false
                        } else {
                            !snapshot.dirty_note_ids.contains(id)
                        };
                        if local_wins {
                            self.update_note(local).await?;
                            merged_metas.push(local.metadata(cloud.order, cloud.folder_id.clone()));
                        } else {
                            let downloaded = self.download_note(id).await?;
                            self.note_store.save(&downloaded)?;
                            merged_metas.push(downloaded.metadata(cloud.order, cloud.folder_id.clone()));
                        }
                    }
                }
                (Some(local), None) => {
                    self.update_note(local).await?;
                    merged_metas.push(local.metadata(merged_metas.len() as i64, None));
                }
                (None, Some(_)) if present_remote.contains(id) => {
                    let downloaded = self.download_note(id).await?;
                    self.note_store.save(&downloaded)?;
                    merged_metas.push(downloaded.metadata(merged_metas.len() as i64, None));
                }
                _ => {}
            }
        }

        let mut merged = local_manifest;
        merged.notes = merged_metas;
        merged.last_sync_client_id = Some(self.client_id.clone());
        merged.assign_implicit_order();
        merged.validate_order_lists();

        // Step 6.
        self.update_note_list(&merged).await?;
        self.note_store.save_manifest(&merged)?;

        // Step 7.
        let hashes: HashMap<String, String> = merged.notes.iter().map(|n| (n.id.clone(), n.content_hash.clone())).collect();
        let drive_ts = self.current_manifest_metadata().await.ok().and_then(|m| m.modified_time);
        let cleared = self
            .sync_state
            .clear_dirty_if_unchanged(snapshot.revision, drive_ts, hashes)
            .map_err(|e| SyncError::Fatal(e.to_string()))?;

        if cleared {
            self.status.notify_status("synced");
            self.status.notify_synced_and_reload();
        } else {
            log::info!("concurrent edit during sync pass, leaving dirty for next cycle");
        }
        Ok(())
    }

    async fn current_manifest_metadata(&self) -> Result<crate::drive_ops::RemoteMetadata> {
        let file_id = self.manifest_file_id.lock().unwrap().clone().ok_or_else(|| SyncError::NotFound("noteList.json".to_string()))?;
        self.drive.get_file_metadata(&file_id).await
    }
}
