//! In-memory remote API for testing.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

use driveup_common::{CancellationGate, Error, RemoteFolderId, Result};

use crate::api::{DriveApi, FileUpload, PermissionGrant, RemoteItem, FOLDER_MIME_TYPE};

/// Number of calls made against each remote operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub find_folder: usize,
    pub create_folder: usize,
    pub upload: usize,
    pub grant_permission: usize,
}

impl CallCounts {
    /// All remote calls combined.
    pub fn total(&self) -> usize {
        self.find_folder + self.create_folder + self.upload + self.grant_permission
    }
}

/// In-memory remote entry.
#[derive(Debug, Clone)]
struct Entry {
    item: RemoteItem,
    parent: String,
    trashed: bool,
    content: Option<Vec<u8>>,
}

#[derive(Debug, Default)]
struct State {
    entries: Vec<Entry>,
    calls: CallCounts,
    failing_uploads: HashSet<String>,
    fail_permissions: bool,
    permissions: Vec<(String, PermissionGrant)>,
}

/// In-memory remote API.
///
/// Records how often each operation is called and can be told to fail
/// specific uploads or every permission grant. Clones share state, so a
/// test can keep a handle while the engine owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryDrive {
    state: Arc<RwLock<State>>,
}

impl MemoryDrive {
    /// Create an empty remote namespace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every upload of an item called `name` fail.
    pub fn fail_upload(&self, name: impl Into<String>) {
        self.state
            .write()
            .unwrap()
            .failing_uploads
            .insert(name.into());
    }

    /// Make every permission grant fail.
    pub fn fail_permissions(&self) {
        self.state.write().unwrap().fail_permissions = true;
    }

    /// Snapshot of the call counters.
    pub fn calls(&self) -> CallCounts {
        self.state.read().unwrap().calls
    }

    /// Non-trashed folders as `(name, parent id)` pairs.
    pub fn folders(&self) -> Vec<(String, String)> {
        self.state
            .read()
            .unwrap()
            .entries
            .iter()
            .filter(|e| e.item.is_folder() && !e.trashed)
            .map(|e| (e.item.name.clone(), e.parent.clone()))
            .collect()
    }

    /// Uploaded files in creation order.
    pub fn files(&self) -> Vec<RemoteItem> {
        self.state
            .read()
            .unwrap()
            .entries
            .iter()
            .filter(|e| !e.item.is_folder())
            .map(|e| e.item.clone())
            .collect()
    }

    /// Parent id of an item.
    pub fn parent_of(&self, id: &str) -> Option<String> {
        self.state
            .read()
            .unwrap()
            .entries
            .iter()
            .find(|e| e.item.id == id)
            .map(|e| e.parent.clone())
    }

    /// Stored content of an uploaded file.
    pub fn content_of(&self, id: &str) -> Option<Vec<u8>> {
        self.state
            .read()
            .unwrap()
            .entries
            .iter()
            .find(|e| e.item.id == id)
            .and_then(|e| e.content.clone())
    }

    /// Permissions granted so far as `(item id, grant)` pairs.
    pub fn permissions(&self) -> Vec<(String, PermissionGrant)> {
        self.state.read().unwrap().permissions.clone()
    }

    /// Seed a folder directly, bypassing the call counters.
    pub fn seed_folder(&self, name: &str, parent: &str, trashed: bool) -> String {
        let item = Self::new_item(name, FOLDER_MIME_TYPE);
        let id = item.id.clone();
        self.state.write().unwrap().entries.push(Entry {
            item,
            parent: parent.to_string(),
            trashed,
            content: None,
        });
        id
    }

    fn new_item(name: &str, mime_type: &str) -> RemoteItem {
        let id = Uuid::new_v4().simple().to_string();
        let is_folder = mime_type == FOLDER_MIME_TYPE;
        RemoteItem {
            web_view_link: Some(if is_folder {
                format!("https://drive.memory/folders/{}", id)
            } else {
                format!("https://drive.memory/file/{}/view", id)
            }),
            web_content_link: None,
            id,
            name: name.to_string(),
            mime_type: mime_type.to_string(),
        }
    }
}

#[async_trait]
impl DriveApi for MemoryDrive {
    fn name(&self) -> &str {
        "memory"
    }

    async fn find_folder(
        &self,
        name: &str,
        parent: &RemoteFolderId,
    ) -> Result<Option<RemoteItem>> {
        let mut state = self.state.write().unwrap();
        state.calls.find_folder += 1;

        Ok(state
            .entries
            .iter()
            .find(|e| {
                e.item.is_folder()
                    && !e.trashed
                    && e.item.name == name
                    && e.parent == parent.as_str()
            })
            .map(|e| e.item.clone()))
    }

    async fn create_folder(&self, name: &str, parent: &RemoteFolderId) -> Result<RemoteItem> {
        let mut state = self.state.write().unwrap();
        state.calls.create_folder += 1;

        let item = Self::new_item(name, FOLDER_MIME_TYPE);
        state.entries.push(Entry {
            item: item.clone(),
            parent: parent.to_string(),
            trashed: false,
            content: None,
        });

        Ok(item)
    }

    async fn create_file_resumable(
        &self,
        upload: &FileUpload,
        gate: &CancellationGate,
    ) -> Result<RemoteItem> {
        gate.check(format!("uploading {}", upload.name))?;

        let failing = {
            let mut state = self.state.write().unwrap();
            state.calls.upload += 1;
            state.failing_uploads.contains(&upload.name)
        };
        if failing {
            return Err(Error::Network(format!(
                "Injected upload failure for {}",
                upload.name
            )));
        }

        let data = tokio::fs::read(&upload.source).await?;
        if data.len() as u64 != upload.size {
            return Err(Error::Transfer(format!(
                "Size mismatch for {}: expected {} bytes, read {}",
                upload.name,
                upload.size,
                data.len()
            )));
        }

        let item = Self::new_item(&upload.name, &upload.mime_type);
        self.state.write().unwrap().entries.push(Entry {
            item: item.clone(),
            parent: upload.parent.to_string(),
            trashed: false,
            content: Some(data),
        });

        Ok(item)
    }

    async fn grant_permission(&self, item_id: &str, grant: &PermissionGrant) -> Result<()> {
        let mut state = self.state.write().unwrap();
        state.calls.grant_permission += 1;

        if state.fail_permissions {
            return Err(Error::PermissionDenied(format!(
                "Cannot share {} with {}",
                item_id, grant.email_address
            )));
        }
        if !state.entries.iter().any(|e| e.item.id == item_id) {
            return Err(Error::NotFound(format!("Item not found: {}", item_id)));
        }

        state.permissions.push((item_id.to_string(), grant.clone()));
        Ok(())
    }
}
