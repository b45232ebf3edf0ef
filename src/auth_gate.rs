use crate::drive_ops::DriveOperations;
use crate::error::SyncError;
use crate::status_sink::StatusSink;
use crate::sync_state::write_atomic;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Holds the refreshable credential's on-disk lifecycle and the
/// connectedness flag; classifies errors and drives the
/// online/offline transitions.
pub struct AuthGate {
    drive: Arc<dyn DriveOperations>,
    status: Arc<dyn StatusSink>,
    token_path: PathBuf,
    initial_sync_flag_path: PathBuf,
    connected: AtomicBool,
}

impl AuthGate {
    pub fn new(drive: Arc<dyn DriveOperations>, status: Arc<dyn StatusSink>, token_path: impl Into<PathBuf>, initial_sync_flag_path: impl Into<PathBuf>) -> Self {
        Self { drive, status, token_path: token_path.into(), initial_sync_flag_path: initial_sync_flag_path.into(), connected: AtomicBool::new(false) }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Persist the OAuth token blob at mode 0600. A refreshed token
    /// (different from what's on disk) is re-persisted the same way.
    pub fn persist_token(&self, token_json: &str) -> std::io::Result<()> {
        write_atomic(&self.token_path, token_json)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.token_path, std::fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }

    pub fn load_token(&self) -> Option<String> {
        std::fs::read_to_string(&self.token_path).ok()
    }

    fn delete_token(&self) {
        let _ = std::fs::remove_file(&self.token_path);
        let _ = std::fs::remove_file(&self.initial_sync_flag_path);
    }

    /// One-off listing with the saved token to validate it still
    /// works; on success marks connected.
    pub async fn try_reconnect(&self) -> bool {
        match self.drive.list_files("trashed = false").await {
            Ok(_) => {
                self.connected.store(true, Ordering::SeqCst);
                true
            }
            Err(e) => {
                self.handle_error(&e);
                false
            }
        }
    }

    /// Classify `err` and perform the matching state transition.
    /// `Cancelled` is never passed here; it's an internal-only variant.
    pub fn handle_error(&self, err: &SyncError) {
        match err {
            SyncError::AuthRevoked | SyncError::AuthExpired => {
                self.delete_token();
                self.connected.store(false, Ordering::SeqCst);
                self.status.notify_status("offline");
            }
            SyncError::NotFound(_) => {
                // Missing remote file doesn't imply a credential problem.
            }
            SyncError::Cancelled => {}
            _ => {
                self.connected.store(false, Ordering::SeqCst);
                self.status.notify_status("offline");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive_ops::{ChangesPage, RemoteFile, RemoteMetadata};
    use crate::error::Result;
    use crate::status_sink::test_support::RecordingStatusSink;
    use async_trait::async_trait;
    use tempfile::tempdir;

    struct FakeDrive {
        fail_with: Option<SyncError>,
    }

    #[async_trait]
    impl DriveOperations for FakeDrive {
        async fn create_file(&self, _: &str, _: Vec<u8>, _: &str, _: &str) -> Result<String> {
            unimplemented!()
        }
        async fn update_file(&self, _: &str, _: Vec<u8>) -> Result<()> {
            unimplemented!()
        }
        async fn delete_file(&self, _: &str) -> Result<()> {
            unimplemented!()
        }
        async fn download_file(&self, _: &str) -> Result<Vec<u8>> {
            unimplemented!()
        }
        async fn create_folder(&self, _: &str, _: &str) -> Result<String> {
            unimplemented!()
        }
        async fn list_files(&self, _: &str) -> Result<Vec<RemoteFile>> {
            match &self.fail_with {
                Some(e) => Err(e.clone()),
                None => Ok(vec![]),
            }
        }
        async fn get_file_metadata(&self, _: &str) -> Result<RemoteMetadata> {
            unimplemented!()
        }
        async fn get_start_page_token(&self) -> Result<String> {
            unimplemented!()
        }
        async fn list_changes(&self, _: &str) -> Result<ChangesPage> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn successful_reconnect_sets_connected() {
        let dir = tempdir().unwrap();
        let gate = AuthGate::new(Arc::new(FakeDrive { fail_with: None }), Arc::new(RecordingStatusSink::default()), dir.path().join("token.json"), dir.path().join("initial_sync_completed"));
        assert!(gate.try_reconnect().await);
        assert!(gate.is_connected());
    }

    #[tokio::test]
    async fn auth_revoked_deletes_token_and_goes_offline() {
        let dir = tempdir().unwrap();
        let token_path = dir.path().join("token.json");
        std::fs::write(&token_path, "stale-token").unwrap();
        let status = Arc::new(RecordingStatusSink::default());
        let gate = AuthGate::new(Arc::new(FakeDrive { fail_with: Some(SyncError::AuthRevoked) }), status.clone(), &token_path, dir.path().join("initial_sync_completed"));

        assert!(!gate.try_reconnect().await);
        assert!(!gate.is_connected());
        assert!(!token_path.exists());
        assert_eq!(status.last_status().as_deref(), Some("offline"));
        assert!(!status.ever_emitted("synced"));
    }

    #[tokio::test]
    async fn transient_failure_goes_offline_but_keeps_token() {
        let dir = tempdir().unwrap();
        let token_path = dir.path().join("token.json");
        std::fs::write(&token_path, "good-token").unwrap();
        let gate = AuthGate::new(Arc::new(FakeDrive { fail_with: Some(SyncError::Transient("connection reset".to_string())) }), Arc::new(RecordingStatusSink::default()), &token_path, dir.path().join("initial_sync_completed"));

        assert!(!gate.try_reconnect().await);
        assert!(token_path.exists());
    }

    #[tokio::test]
    async fn not_found_does_not_change_connectedness() {
        let dir = tempdir().unwrap();
        let gate = AuthGate::new(Arc::new(FakeDrive { fail_with: Some(SyncError::NotFound("a".to_string())) }), Arc::new(RecordingStatusSink::default()), dir.path().join("token.json"), dir.path().join("initial_sync_completed"));
        gate.handle_error(&SyncError::NotFound("a".to_string()));
        assert!(!gate.is_connected());
        let _ = gate; // no panic is the assertion; state genuinely untouched either way
    }
}
