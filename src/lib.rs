mod auth_gate;
mod drive_ops;
mod error;
mod manifest;
mod note;
mod note_store;
mod oauth;
mod operation_queue;
mod poller;
mod retry;
mod root_layout;
mod status_sink;
mod sync_engine;
mod sync_plan;
mod sync_state;

use auth_gate::AuthGate;
use drive_ops::{DriveOperations, GoogleDriveOps};
use error::SyncError;
use note::Note;
use note_store::{FsNoteStore, NoteStore};
use poller::Poller;
use status_sink::StatusSink;
use std::path::PathBuf;
use std::sync::Arc;
use sync_engine::SyncEngine;
use sync_state::SyncState;
use tauri::{Emitter, Manager, State};
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use uuid::Uuid;

/// Everything that exists only once a Drive connection has been
/// established.
struct Connected {
    engine: Arc<SyncEngine>,
    poller: Arc<Poller>,
    queue: Arc<operation_queue::OperationQueue>,
}

struct TauriStatusSink(tauri::AppHandle);

impl StatusSink for TauriStatusSink {
    fn notify_status(&self, status: &str) {
        let _ = self.0.emit("sync:status", status.to_string());
    }

    fn notify_synced_and_reload(&self) {
        let _ = self.0.emit("notes:reload", ());
    }

    fn log(&self, level: log::Level, message: &str) {
        log::log!(level, "{}", message);
    }
}

pub struct AppState {
    note_store: Arc<dyn NoteStore>,
    sync_state: Arc<SyncState>,
    auth: Arc<AuthGate>,
    status: Arc<dyn StatusSink>,
    client_id: String,
    app_data_dir: PathBuf,
    connected: AsyncMutex<Option<Connected>>,
    frontend_ready: AsyncMutex<Option<oneshot::Sender<()>>>,
}

fn to_string_err(e: SyncError) -> String {
    e.to_string()
}

#[tauri::command]
async fn save_note(state: State<'_, AppState>, note: Note) -> Result<(), String> {
    state.note_store.save(&note).map_err(to_string_err)?;
    state.sync_state.mark_note_dirty(&note.id).map_err(|e| e.to_string())?;
    if let Some(connected) = state.connected.lock().await.as_ref() {
        connected.engine.update_note(&note).await.map_err(to_string_err)?;
    }
    Ok(())
}

#[tauri::command]
async fn load_note(state: State<'_, AppState>, id: String) -> Result<Note, String> {
    state.note_store.load(&id).map_err(to_string_err)
}

#[tauri::command]
async fn delete_note(state: State<'_, AppState>, id: String) -> Result<(), String> {
    state.note_store.delete(&id).map_err(to_string_err)?;
    state.sync_state.mark_note_deleted(&id).map_err(|e| e.to_string())?;
    if let Some(connected) = state.connected.lock().await.as_ref() {
        connected.engine.delete_note(&id).await.map_err(to_string_err)?;
    }
    Ok(())
}

#[tauri::command]
async fn list_notes(state: State<'_, AppState>) -> Result<Vec<Note>, String> {
    state.note_store.list_metadata().map_err(to_string_err)
}

#[tauri::command]
async fn get_sync_plan(state: State<'_, AppState>) -> Result<sync_plan::SyncPlan, String> {
    let guard = state.connected.lock().await;
    let connected = guard.as_ref().ok_or_else(|| "not connected to Google Drive".to_string())?;
    connected.engine.sync_plan().await.map_err(to_string_err)
}

#[tauri::command]
async fn force_full_sync(state: State<'_, AppState>) -> Result<(), String> {
    let guard = state.connected.lock().await;
    let connected = guard.as_ref().ok_or_else(|| "not connected to Google Drive".to_string())?;
    connected.engine.full_sync().await.map_err(to_string_err)
}

/// Runs the OAuth flow if needed, resolves the remote layout, and
/// wires up the engine/queue/poller for this session.
#[tauri::command]
async fn connect_google_drive(app: tauri::AppHandle, state: State<'_, AppState>) -> Result<(), String> {
    let token_path = state.app_data_dir.join("token.json");
    let hub = oauth::create_drive_hub(token_path.clone()).await.map_err(|e| e.to_string())?;
    let drive: Arc<dyn DriveOperations> = Arc::new(GoogleDriveOps::new(hub));

    let layout_path = root_layout::default_cache_path(&state.app_data_dir);
    let layout = root_layout::ensure_layout(&drive, &layout_path).await.map_err(to_string_err)?;
    let root_id = layout.root_folder_id.unwrap();
    let notes_id = layout.notes_folder_id.unwrap();
    let manifest_id = layout.manifest_file_id;

    let queue = Arc::new(operation_queue::OperationQueue::new(drive.clone()));
    let engine = Arc::new(SyncEngine::new(
        drive.clone(),
        queue.clone(),
        state.note_store.clone(),
        state.sync_state.clone(),
        state.status.clone(),
        root_id.clone(),
        notes_id.clone(),
        state.client_id.clone(),
        manifest_id,
    ));
    let poller = Arc::new(Poller::new(engine.clone(), drive, queue.clone(), state.auth.clone(), state.status.clone(), root_id, notes_id, state.client_id.clone()));

    let (ready_tx, ready_rx) = oneshot::channel();
    *state.frontend_ready.lock().await = Some(ready_tx);

    let poller_for_task = poller.clone();
    tauri::async_runtime::spawn(async move {
        poller_for_task.run(ready_rx).await;
    });

    *state.connected.lock().await = Some(Connected { engine, poller, queue });
    state.status.notify_status("syncing");
    let _ = app;
    Ok(())
}

#[tauri::command]
async fn disconnect_google_drive(state: State<'_, AppState>) -> Result<(), String> {
    if let Some(connected) = state.connected.lock().await.take() {
        connected.poller.stop();
        connected.queue.close().await;
    }
    state.status.notify_status("offline");
    Ok(())
}

/// Single-shot signal from the UI host that it's ready to receive
/// sync events, gating the poller's first tick.
#[tauri::command]
async fn frontend_ready(state: State<'_, AppState>) -> Result<(), String> {
    if let Some(tx) = state.frontend_ready.lock().await.take() {
        let _ = tx.send(());
    }
    Ok(())
}

#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    tauri::Builder::default()
        .plugin(tauri_plugin_opener::init())
        .setup(|app| {
            let app_data_dir = app.path().app_data_dir().expect("resolve app data dir");
            std::fs::create_dir_all(&app_data_dir).expect("create app data dir");

            let note_store: Arc<dyn NoteStore> = Arc::new(FsNoteStore::new(app_data_dir.clone()));
            note_store.migrate_if_needed().map_err(|e| e.to_string())?;

            let sync_state = Arc::new(SyncState::load_or_default(app_data_dir.join("sync_state.json")).expect("load sync state"));
            let status: Arc<dyn StatusSink> = Arc::new(TauriStatusSink(app.handle().clone()));
            let auth = Arc::new(AuthGate::new(
                Arc::new(NullDrive) as Arc<dyn DriveOperations>,
                status.clone(),
                app_data_dir.join("token.json"),
                app_data_dir.join("initial_sync_completed"),
            ));

            app.manage(AppState {
                note_store,
                sync_state,
                auth,
                status,
                client_id: Uuid::new_v4().to_string(),
                app_data_dir,
                connected: AsyncMutex::new(None),
                frontend_ready: AsyncMutex::new(None),
            });
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            save_note,
            load_note,
            delete_note,
            list_notes,
            force_full_sync,
            get_sync_plan,
            connect_google_drive,
            disconnect_google_drive,
            frontend_ready,
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}

/// Placeholder `DriveOperations` for the `AuthGate` held before a real
/// session connects; every call is a deliberate `Transient` so the
/// gate simply reports offline instead of panicking.
struct NullDrive;

#[async_trait::async_trait]
impl DriveOperations for NullDrive {
    async fn create_file(&self, _: &str, _: Vec<u8>, _: &str, _: &str) -> error::Result<String> {
        Err(SyncError::Transient("not connected".to_string()))
    }
    async fn update_file(&self, _: &str, _: Vec<u8>) -> error::Result<()> {
        Err(SyncError::Transient("not connected".to_string()))
    }
    async fn delete_file(&self, _: &str) -> error::Result<()> {
        Err(SyncError::Transient("not connected".to_string()))
    }
    async fn download_file(&self, _: &str) -> error::Result<Vec<u8>> {
        Err(SyncError::Transient("not connected".to_string()))
    }
    async fn create_folder(&self, _: &str, _: &str) -> error::Result<String> {
        Err(SyncError::Transient("not connected".to_string()))
    }
    async fn list_files(&self, _: &str) -> error::Result<Vec<drive_ops::RemoteFile>> {
        Err(SyncError::Transient("not connected".to_string()))
    }
    async fn get_file_metadata(&self, _: &str) -> error::Result<drive_ops::RemoteMetadata> {
        Err(SyncError::Transient("not connected".to_string()))
    }
    async fn get_start_page_token(&self) -> error::Result<String> {
        Err(SyncError::Transient("not connected".to_string()))
    }
    async fn list_changes(&self, _: &str) -> error::Result<drive_ops::ChangesPage> {
        Err(SyncError::Transient("not connected".to_string()))
    }
}
