use crate::error::{Result, SyncError};
use async_trait::async_trait;
use google_drive3::api::Scope;
use google_drive3::{api::File as DriveFile, hyper, hyper_rustls, DriveHub};

/// A file returned by `list_files`.
#[derive(Debug, Clone)]
pub struct RemoteFile {
    pub id: String,
    pub name: String,
    pub created_time: Option<String>,
    pub parents: Vec<String>,
}

/// Metadata returned by `get_file_metadata`.
#[derive(Debug, Clone)]
pub struct RemoteMetadata {
    pub id: String,
    pub md5_checksum: Option<String>,
    pub modified_time: Option<String>,
}

/// A single change record from the changes API.
#[derive(Debug, Clone)]
pub struct ChangeRecord {
    pub file_id: String,
    pub file_name: Option<String>,
    pub parents: Vec<String>,
    pub trashed: bool,
}

/// The result of `list_changes`.
#[derive(Debug, Clone)]
pub struct ChangesPage {
    pub changes: Vec<ChangeRecord>,
    pub new_start_page_token: Option<String>,
}

/// Thin, synchronous-semantics capability over the remote store: no
/// retry, no debounce. `OperationQueue`/`SyncEngine` add those on top.
/// Modeled as an `async_trait` port so a fake can stand in for tests.
#[async_trait]
pub trait DriveOperations: Send + Sync {
    async fn create_file(&self, name: &str, bytes: Vec<u8>, parent_id: &str, mime: &str) -> Result<String>;
    async fn update_file(&self, file_id: &str, bytes: Vec<u8>) -> Result<()>;
    async fn delete_file(&self, file_id: &str) -> Result<()>;
    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>>;
    async fn create_folder(&self, name: &str, parent_id: &str) -> Result<String>;
    async fn list_files(&self, query: &str) -> Result<Vec<RemoteFile>>;
    async fn get_file_metadata(&self, file_id: &str) -> Result<RemoteMetadata>;
    async fn get_start_page_token(&self) -> Result<String>;
    async fn list_changes(&self, page_token: &str) -> Result<ChangesPage>;
}

type Connector = hyper_rustls::HttpsConnector<hyper::client::HttpConnector>;

/// Production `DriveOperations` backed by `google_drive3::DriveHub`,
/// with no folder-resolution or retry logic of its own — those live
/// in `RootLayout`/`AuthGate`/`SyncEngine`.
pub struct GoogleDriveOps {
    hub: DriveHub<Connector>,
}

impl GoogleDriveOps {
    pub fn new(hub: DriveHub<Connector>) -> Self {
        Self { hub }
    }

    fn api_err(context: &str, e: impl std::fmt::Display) -> SyncError {
        SyncError::classify(&format!("{}: {}", context, e))
    }
}

#[async_trait]
impl DriveOperations for GoogleDriveOps {
    async fn create_file(&self, name: &str, bytes: Vec<u8>, parent_id: &str, mime: &str) -> Result<String> {
        let drive_file = DriveFile {
            name: Some(name.to_string()),
            parents: Some(vec![parent_id.to_string()]),
            ..Default::default()
        };
        let content_type: mime::Mime = mime.parse().map_err(|_| SyncError::Fatal(format!("bad mime: {}", mime)))?;
        let (_, file) = self
            .hub
            .files()
            .create(drive_file)
            .add_scope(Scope::Full)
            .upload(std::io::Cursor::new(bytes), content_type)
            .await
            .map_err(|e| Self::api_err("create_file", e))?;
        file.id.ok_or_else(|| SyncError::Fatal("created file has no id".to_string()))
    }

    async fn update_file(&self, file_id: &str, bytes: Vec<u8>) -> Result<()> {
        self.hub
            .files()
            .update(DriveFile::default(), file_id)
            .add_scope(Scope::Full)
            .upload(std::io::Cursor::new(bytes), "application/json".parse().unwrap())
            .await
            .map_err(|e| Self::api_err("update_file", e))?;
        Ok(())
    }

    async fn delete_file(&self, file_id: &str) -> Result<()> {
        self.hub
            .files()
            .delete(file_id)
            .add_scope(Scope::Full)
            .doit()
            .await
            .map_err(|e| Self::api_err("delete_file", e))?;
        Ok(())
    }

    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>> {
        let response = self
            .hub
            .files()
            .get(file_id)
            .param("alt", "media")
            .add_scope(Scope::Full)
            .doit()
            .await
            .map_err(|e| Self::api_err("download_file", e))?;
        let bytes = hyper::body::to_bytes(response.0.into_body())
            .await
            .map_err(|e| SyncError::Transient(format!("download_file body: {}", e)))?;
        Ok(bytes.to_vec())
    }

    async fn create_folder(&self, name: &str, parent_id: &str) -> Result<String> {
        let new_folder = DriveFile {
            name: Some(name.to_string()),
            mime_type: Some("application/vnd.google-apps.folder".to_string()),
            parents: Some(vec![parent_id.to_string()]),
            ..Default::default()
        };
        let (_, file) = self
            .hub
            .files()
            .create(new_folder)
            .add_scope(Scope::Full)
            .upload(std::io::empty(), "application/vnd.google-apps.folder".parse().unwrap())
            .await
            .map_err(|e| Self::api_err("create_folder", e))?;
        file.id.ok_or_else(|| SyncError::Fatal("created folder has no id".to_string()))
    }

    async fn list_files(&self, query: &str) -> Result<Vec<RemoteFile>> {
        let (_, file_list) = self
            .hub
            .files()
            .list()
            .q(query)
            .corpora("user")
            .param("fields", "files(id, name, createdTime, parents)")
            .add_scope(Scope::Full)
            .doit()
            .await
            .map_err(|e| Self::api_err("list_files", e))?;

        Ok(file_list
            .files
            .unwrap_or_default()
            .into_iter()
            .filter_map(|f| {
                Some(RemoteFile {
                    id: f.id?,
                    name: f.name.unwrap_or_default(),
                    created_time: f.created_time.map(|t| t.to_rfc3339()),
                    parents: f.parents.unwrap_or_default(),
                })
            })
            .collect())
    }

    async fn get_file_metadata(&self, file_id: &str) -> Result<RemoteMetadata> {
        let (_, file) = self
            .hub
            .files()
            .get(file_id)
            .param("fields", "id, md5Checksum, modifiedTime")
            .add_scope(Scope::Full)
            .doit()
            .await
            .map_err(|e| Self::api_err("get_file_metadata", e))?;

        Ok(RemoteMetadata {
            id: file.id.unwrap_or_default(),
            md5_checksum: file.md5_checksum,
            modified_time: file.modified_time.map(|t| t.to_rfc3339()),
        })
    }

    async fn get_start_page_token(&self) -> Result<String> {
        let (_, token) = self
            .hub
            .changes()
            .get_start_page_token()
            .add_scope(Scope::Full)
            .doit()
            .await
            .map_err(|e| Self::api_err("get_start_page_token", e))?;
        token
            .start_page_token
            .ok_or_else(|| SyncError::Fatal("no start page token returned".to_string()))
    }

    async fn list_changes(&self, page_token: &str) -> Result<ChangesPage> {
        let (_, result) = self
            .hub
            .changes()
            .list(page_token)
            .param("fields", "newStartPageToken, changes(fileId, file(name, parents, trashed))")
            .add_scope(Scope::Full)
            .doit()
            .await
            .map_err(|e| Self::api_err("list_changes", e))?;

        let changes = result
            .changes
            .unwrap_or_default()
            .into_iter()
            .filter_map(|c| {
                let file_id = c.file_id?;
                let file = c.file;
                Ok::<_, ()>(ChangeRecord {
                    file_id,
                    file_name: file.as_ref().and_then(|f| f.name.clone()),
                    parents: file.as_ref().and_then(|f| f.parents.clone()).unwrap_or_default(),
                    trashed: file.as_ref().and_then(|f| f.trashed).unwrap_or(false),
                })
                .ok()
            })
            .collect();

        Ok(ChangesPage { changes, new_start_page_token: result.new_start_page_token })
    }
}
