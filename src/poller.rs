use crate::auth_gate::AuthGate;
use crate::drive_ops::{ChangeRecord, DriveOperations};
use crate::error::Result;
use crate::operation_queue::OperationQueue;
use crate::status_sink::StatusSink;
use crate::sync_engine::SyncEngine;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex, Notify};

const INITIAL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_INTERVAL: Duration = Duration::from_secs(60);
const INTERVAL_FACTOR: f64 = 1.5;
const RECONNECT_BASE: Duration = Duration::from_secs(10);
const RECONNECT_MAX: Duration = Duration::from_secs(180);

/// Drives periodic reconciliation: delta sync via the changes-API
/// token when available, full-sync fallback otherwise, with
/// multiplicative interval backoff and a separate reconnect loop
/// while offline.
pub struct Poller {
    engine: Arc<SyncEngine>,
    drive: Arc<dyn DriveOperations>,
    queue: Arc<OperationQueue>,
    auth: Arc<AuthGate>,
    status: Arc<dyn StatusSink>,
    change_token: Mutex<Option<String>>,
    reset_tx: mpsc::Sender<()>,
    reset_rx: Mutex<mpsc::Receiver<()>>,
    stop: Notify,
    stopped: AtomicBool,
    root_folder_id: String,
    notes_folder_id: String,
    client_id: String,
}

impl Poller {
    pub fn new(
        engine: Arc<SyncEngine>,
        drive: Arc<dyn DriveOperations>,
        queue: Arc<OperationQueue>,
        auth: Arc<AuthGate>,
        status: Arc<dyn StatusSink>,
        root_folder_id: impl Into<String>,
        notes_folder_id: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Self {
        let (reset_tx, reset_rx) = mpsc::channel(1);
        Self {
            engine,
            drive,
            queue,
            auth,
            status,
            change_token: Mutex::new(None),
            reset_tx,
            reset_rx: Mutex::new(reset_rx),
            stop: Notify::new(),
            stopped: AtomicBool::new(false),
            root_folder_id: root_folder_id.into(),
            notes_folder_id: notes_folder_id.into(),
            client_id: client_id.into(),
        }
    }

    /// Drops the signal if one is already pending; never blocks.
    pub fn reset_polling_interval(&self) {
        let _ = self.reset_tx.try_send(());
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.stop.notify_waiters();
    }

    /// Waits for the external `frontendReady` single-shot signal, runs
    /// one full sync, then enters the poll loop.
    pub async fn run(&self, frontend_ready: oneshot::Receiver<()>) {
        let _ = frontend_ready.await;
        if let Err(e) = self.engine.full_sync().await {
            self.auth.handle_error(&e);
        }

        let mut interval = INITIAL_INTERVAL;
        let mut reconnect_delay = RECONNECT_BASE;
        let mut reset_rx = self.reset_rx.lock().await;

        while !self.stopped.load(Ordering::SeqCst) {
            tokio::select! {
                _ = self.stop.notified() => break,
                _ = tokio::time::sleep(interval) => {}
                _ = reset_rx.recv() => {
                    interval = INITIAL_INTERVAL;
                    continue;
                }
            }
            if self.stopped.load(Ordering::SeqCst) {
                break;
            }

            if !self.auth.is_connected() {
                if self.auth.try_reconnect().await {
                    interval = INITIAL_INTERVAL;
                    reconnect_delay = RECONNECT_BASE;
                    *self.change_token.lock().await = None;
                } else {
                    tokio::time::sleep(reconnect_delay).await;
                    reconnect_delay = std::cmp::min(reconnect_delay * 2, RECONNECT_MAX);
                    continue;
                }
            }

            if self.queue.has_items() {
                interval = INITIAL_INTERVAL;
                continue;
            }

            match self.check_for_changes().await {
                Ok(true) => {
                    if let Err(e) = self.engine.full_sync().await {
                        self.auth.handle_error(&e);
                    }
                    interval = INITIAL_INTERVAL;
                }
                Ok(false) => {
                    interval = scale_interval(interval);
                }
                Err(e) => {
                    self.auth.handle_error(&e);
                }
            }
        }
    }

    /// No token -> full sync + fresh token, report "no changes"; else
    /// consult the changes API and classify relevance.
    async fn check_for_changes(&self) -> Result<bool> {
        let token = self.change_token.lock().await.clone();
        let Some(token) = token else {
            self.engine.full_sync().await?;
            let fresh = self.drive.get_start_page_token().await?;
            *self.change_token.lock().await = Some(fresh);
            return Ok(false);
        };

        match self.drive.list_changes(&token).await {
            Ok(page) => {
                if let Some(new_token) = page.new_start_page_token {
                    *self.change_token.lock().await = Some(new_token);
                }
                let mut relevant_changes: Vec<&ChangeRecord> = page.changes.iter().filter(|c| self.is_relevant(c)).collect();
                if relevant_changes.len() == 1 && relevant_changes[0].file_name.as_deref() == Some("noteList.json") && self.is_self_echo().await {
                    relevant_changes.clear();
                }
                Ok(!relevant_changes.is_empty())
            }
            Err(_) => {
                // Clear the token so the next tick performs a full sync.
                *self.change_token.lock().await = None;
                self.status.log(log::Level::Warn, "changes API failed, forcing full sync");
                Ok(true)
            }
        }
    }

    fn is_relevant(&self, change: &ChangeRecord) -> bool {
        let parent_is_ours = change.parents.iter().any(|p| p == &self.root_folder_id || p == &self.notes_folder_id);
        let name_is_json = change.file_name.as_deref().map(|n| n.ends_with(".json")).unwrap_or(false);
        parent_is_ours || name_is_json
    }

    /// A manifest-only change whose `lastSyncClientID` equals our own
    /// id is our own echo, not a remote edit worth reconciling.
    async fn is_self_echo(&self) -> bool {
        match self.engine.download_note_list().await {
            Ok(manifest) => manifest.last_sync_client_id.as_deref() == Some(self.client_id.as_str()),
            Err(_) => false,
        }
    }
}

fn scale_interval(current: Duration) -> Duration {
    let scaled = current.mul_f64(INTERVAL_FACTOR);
    std::cmp::min(scaled, MAX_INTERVAL)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive_ops::{ChangesPage, RemoteFile, RemoteMetadata};
    use crate::note_store::FsNoteStore;
    use crate::status_sink::test_support::RecordingStatusSink;
    use crate::sync_state::SyncState;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use tempfile::tempdir;

    struct FakeDrive {
        list_changes_result: StdMutex<Option<Result<ChangesPage>>>,
    }

    #[async_trait]
    impl DriveOperations for FakeDrive {
        async fn create_file(&self, _: &str, _: Vec<u8>, _: &str, _: &str) -> Result<String> {
            Ok("id".to_string())
        }
        async fn update_file(&self, _: &str, _: Vec<u8>) -> Result<()> {
            Ok(())
        }
        async fn delete_file(&self, _: &str) -> Result<()> {
            Ok(())
        }
        async fn download_file(&self, _: &str) -> Result<Vec<u8>> {
            Ok(serde_json::to_vec(&crate::manifest::NoteList::default()).unwrap())
        }
        async fn create_folder(&self, _: &str, _: &str) -> Result<String> {
            Ok("folder".to_string())
        }
        async fn list_files(&self, _: &str) -> Result<Vec<RemoteFile>> {
            Ok(vec![])
        }
        async fn get_file_metadata(&self, _: &str) -> Result<RemoteMetadata> {
            Ok(RemoteMetadata { id: "m".to_string(), md5_checksum: Some("abc".to_string()), modified_time: None })
        }
        async fn get_start_page_token(&self) -> Result<String> {
            Ok("tok-1".to_string())
        }
        async fn list_changes(&self, _: &str) -> Result<ChangesPage> {
            self.list_changes_result.lock().unwrap().take().unwrap()
        }
    }

    fn make_poller(drive: Arc<FakeDrive>, dir: &std::path::Path) -> Poller {
        let queue = Arc::new(OperationQueue::new(drive.clone()));
        let store = Arc::new(FsNoteStore::new(dir));
        let state = Arc::new(SyncState::load_or_default(dir.join("sync_state.json")).unwrap());
        let status: Arc<dyn StatusSink> = Arc::new(RecordingStatusSink::default());
        let engine = Arc::new(SyncEngine::new(drive.clone(), queue.clone(), store, state, status.clone(), "root", "notes", "client-1", None));
        let auth = Arc::new(AuthGate::new(drive.clone(), status.clone(), dir.join("token.json"), dir.join("initial_sync_completed")));
        Poller::new(engine, drive, queue, auth, status, "root", "notes", "client-1")
    }

    #[tokio::test]
    async fn changes_api_failure_clears_token_and_forces_full_sync() {
        let dir = tempdir().unwrap();
        let drive = Arc::new(FakeDrive { list_changes_result: StdMutex::new(Some(Err(crate::error::SyncError::Transient("boom".to_string())))) });
        let poller = make_poller(drive, dir.path());
        *poller.change_token.lock().await = Some("valid".to_string());

        let has_changes = poller.check_for_changes().await.unwrap();
        assert!(has_changes);
        assert!(poller.change_token.lock().await.is_none());
    }

    #[tokio::test]
    async fn no_token_triggers_full_sync_and_mints_fresh_token() {
        let dir = tempdir().unwrap();
        let drive = Arc::new(FakeDrive { list_changes_result: StdMutex::new(None) });
        let poller = make_poller(drive, dir.path());

        let has_changes = poller.check_for_changes().await.unwrap();
        assert!(!has_changes);
        assert_eq!(poller.change_token.lock().await.as_deref(), Some("tok-1"));
    }

    #[test]
    fn scale_interval_caps_at_max() {
        let mut interval = INITIAL_INTERVAL;
        for _ in 0..20 {
            interval = scale_interval(interval);
        }
        assert_eq!(interval, MAX_INTERVAL);
    }

    #[tokio::test]
    async fn irrelevant_change_reports_no_changes() {
        let dir = tempdir().unwrap();
        let page = ChangesPage {
            changes: vec![ChangeRecord { file_id: "x".to_string(), file_name: Some("unrelated.txt".to_string()), parents: vec!["other".to_string()], trashed: false }],
            new_start_page_token: Some("tok-2".to_string()),
        };
        let drive = Arc::new(FakeDrive { list_changes_result: StdMutex::new(Some(Ok(page))) });
        let poller = make_poller(drive, dir.path());
        *poller.change_token.lock().await = Some("valid".to_string());

        let has_changes = poller.check_for_changes().await.unwrap();
        assert!(!has_changes);
    }
}
