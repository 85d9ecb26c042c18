//! Abstract remote API used by the upload engine.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use driveup_common::{CancellationGate, RemoteFolderId, Result};

/// MIME type the remote uses to mark folders.
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// An item returned by the remote API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteItem {
    /// Remote identifier.
    pub id: String,
    /// Item name.
    pub name: String,
    /// MIME type.
    pub mime_type: String,
    /// Link to view the item in a browser.
    pub web_view_link: Option<String>,
    /// Link to download the item content.
    pub web_content_link: Option<String>,
}

impl RemoteItem {
    /// Check if this is a folder.
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME_TYPE
    }

    /// The view link, falling back to the download link, else empty.
    pub fn share_url(&self) -> String {
        self.web_view_link
            .clone()
            .or_else(|| self.web_content_link.clone())
            .unwrap_or_default()
    }
}

/// A local file to be created remotely.
#[derive(Debug, Clone)]
pub struct FileUpload {
    /// Name the remote item gets.
    pub name: String,
    /// Remote folder the item is created in.
    pub parent: RemoteFolderId,
    /// Local file whose content is streamed.
    pub source: PathBuf,
    /// MIME type sent with the content.
    pub mime_type: String,
    /// Content length in bytes.
    pub size: u64,
}

/// A permission to attach to an uploaded item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionGrant {
    /// Principal kind ("user").
    #[serde(rename = "type")]
    pub principal_type: String,
    /// Role granted ("writer").
    pub role: String,
    /// Principal address.
    pub email_address: String,
    /// Whether the principal is notified by mail.
    #[serde(skip)]
    pub send_notification: bool,
}

impl PermissionGrant {
    /// Write access for one user, without a notification mail.
    pub fn writer(email: impl Into<String>) -> Self {
        Self {
            principal_type: "user".to_string(),
            role: "writer".to_string(),
            email_address: email.into(),
            send_notification: false,
        }
    }
}

/// Remote API surface consumed by the upload engine.
///
/// Each method is one suspension point of a run. Implementations must
/// handle their own authentication.
#[async_trait]
pub trait DriveApi: Send + Sync {
    /// Get the backend name (e.g., "gdrive", "memory").
    fn name(&self) -> &str;

    /// Find a non-trashed folder called `name` directly under `parent`.
    ///
    /// # Returns
    /// The first match, or `None` when no such folder exists.
    async fn find_folder(&self, name: &str, parent: &RemoteFolderId)
        -> Result<Option<RemoteItem>>;

    /// Create a folder called `name` under `parent`.
    async fn create_folder(&self, name: &str, parent: &RemoteFolderId) -> Result<RemoteItem>;

    /// Create a file by streaming `upload.source` in resumable chunks.
    ///
    /// The gate is checked before the session is opened and before every
    /// chunk.
    ///
    /// # Errors
    /// - Cancelled between chunks
    /// - Local read errors
    /// - Network/authentication errors
    async fn create_file_resumable(
        &self,
        upload: &FileUpload,
        gate: &CancellationGate,
    ) -> Result<RemoteItem>;

    /// Attach a permission to an item.
    async fn grant_permission(&self, item_id: &str, grant: &PermissionGrant) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(view: Option<&str>, content: Option<&str>) -> RemoteItem {
        RemoteItem {
            id: "1".to_string(),
            name: "a.png".to_string(),
            mime_type: "image/png".to_string(),
            web_view_link: view.map(String::from),
            web_content_link: content.map(String::from),
        }
    }

    #[test]
    fn test_share_url_prefers_view_link() {
        assert_eq!(item(Some("v"), Some("c")).share_url(), "v");
        assert_eq!(item(None, Some("c")).share_url(), "c");
        assert_eq!(item(None, None).share_url(), "");
    }

    #[test]
    fn test_permission_grant_serialization() {
        let grant = PermissionGrant::writer("someone@example.com");
        let json = serde_json::to_value(&grant).unwrap();

        assert_eq!(json["type"], "user");
        assert_eq!(json["role"], "writer");
        assert_eq!(json["emailAddress"], "someone@example.com");
        assert!(json.get("sendNotification").is_none());
    }
}
