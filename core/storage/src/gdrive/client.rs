//! Google Drive API client.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tracing::debug;

use driveup_common::{CancellationGate, Error, RemoteFolderId, Result};

use super::auth::AccessTokenSource;
use crate::api::{DriveApi, FileUpload, PermissionGrant, RemoteItem, FOLDER_MIME_TYPE};
use crate::retry::{RetryConfig, RetryExecutor};

/// Google Drive API base URL.
const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";
/// Google Drive upload API base URL.
const DRIVE_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";

/// Resumable chunks must be a multiple of 256 KiB.
const CHUNK_GRANULARITY: usize = 256 * 1024;
/// Default chunk size for resumable uploads.
pub const DEFAULT_CHUNK_SIZE: usize = 8 * CHUNK_GRANULARITY;

const DEFAULT_USER_AGENT: &str = concat!("driveup/", env!("CARGO_PKG_VERSION"));

const ITEM_FIELDS: &str = "id,name,mimeType,webViewLink,webContentLink";
const LIST_FIELDS: &str = "files(id,name,mimeType,webViewLink,webContentLink)";

/// Google Drive file metadata from API.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    web_view_link: Option<String>,
    #[serde(default)]
    web_content_link: Option<String>,
}

impl From<DriveFile> for RemoteItem {
    fn from(file: DriveFile) -> Self {
        RemoteItem {
            id: file.id,
            name: file.name,
            mime_type: file.mime_type,
            web_view_link: file.web_view_link,
            web_content_link: file.web_content_link,
        }
    }
}

/// Response from listing files.
#[derive(Debug, Deserialize)]
struct FileListResponse {
    #[serde(default)]
    files: Vec<DriveFile>,
}

/// Escape a value for use inside a single-quoted query literal.
pub fn escape_query_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Google Drive API client.
pub struct DriveClient {
    http: Client,
    tokens: Arc<dyn AccessTokenSource>,
    api_base: String,
    upload_base: String,
    chunk_size: usize,
    chunk_retry: RetryExecutor,
}

impl DriveClient {
    /// Create a new Drive client.
    pub fn new(tokens: Arc<dyn AccessTokenSource>) -> Result<Self> {
        Ok(Self {
            http: build_http(DEFAULT_USER_AGENT)?,
            tokens,
            api_base: DRIVE_API_BASE.to_string(),
            upload_base: DRIVE_UPLOAD_BASE.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_retry: RetryExecutor::default(),
        })
    }

    /// Point the client at different API and upload endpoints.
    pub fn with_endpoints(mut self, api_base: impl Into<String>, upload_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self.upload_base = upload_base.into().trim_end_matches('/').to_string();
        self
    }

    /// Retry policy applied to every chunk PUT.
    pub fn with_chunk_retry(mut self, config: RetryConfig) -> Self {
        self.chunk_retry = RetryExecutor::new(config);
        self
    }

    /// Set the resumable chunk size, rounded down to a multiple of 256 KiB.
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = (size / CHUNK_GRANULARITY).max(1) * CHUNK_GRANULARITY;
        self
    }

    /// Send a different `User-Agent`.
    pub fn with_user_agent(mut self, user_agent: &str) -> Result<Self> {
        self.http = build_http(user_agent)?;
        Ok(self)
    }

    /// Chunk size in bytes.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Get authorization header.
    async fn auth_header(&self) -> Result<String> {
        let token = self.tokens.access_token().await?;
        Ok(format!("Bearer {}", token))
    }

    /// Start a resumable upload session and return its URI.
    async fn start_resumable_upload(&self, upload: &FileUpload) -> Result<String> {
        let url = format!("{}/files", self.upload_base);
        let auth = self.auth_header().await?;

        let metadata = serde_json::json!({
            "name": upload.name,
            "parents": [upload.parent.as_str()],
            "mimeType": upload.mime_type,
        });

        let response = self
            .http
            .post(&url)
            .header(header::AUTHORIZATION, auth)
            .header("X-Upload-Content-Type", upload.mime_type.as_str())
            .header("X-Upload-Content-Length", upload.size.to_string())
            .query(&[
                ("uploadType", "resumable"),
                ("supportsAllDrives", "true"),
                ("fields", ITEM_FIELDS),
            ])
            .json(&metadata)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to start resumable upload: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, "Failed to start resumable upload", &body));
        }

        let upload_uri = response
            .headers()
            .get(header::LOCATION)
            .ok_or_else(|| Error::Transfer("No upload URI in response".to_string()))?
            .to_str()
            .map_err(|e| Error::Transfer(format!("Invalid upload URI: {}", e)))?
            .to_string();

        Ok(upload_uri)
    }

    /// Upload a chunk to a resumable upload session.
    ///
    /// Returns the created file once the last chunk is accepted.
    async fn upload_chunk(
        &self,
        upload_uri: &str,
        data: Bytes,
        start_byte: u64,
        total_size: u64,
    ) -> Result<Option<DriveFile>> {
        let content_range = if data.is_empty() {
            format!("bytes */{}", total_size)
        } else {
            let end_byte = start_byte + data.len() as u64 - 1;
            format!("bytes {}-{}/{}", start_byte, end_byte, total_size)
        };

        let response = self
            .http
            .put(upload_uri)
            .header(header::CONTENT_RANGE, content_range)
            .body(data)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to upload chunk: {}", e)))?;

        let status = response.status();

        if status == StatusCode::OK || status == StatusCode::CREATED {
            let file: DriveFile = response
                .json()
                .await
                .map_err(|e| Error::Transfer(format!("Failed to parse upload response: {}", e)))?;
            Ok(Some(file))
        } else if status == StatusCode::PERMANENT_REDIRECT {
            // 308 Resume Incomplete
            Ok(None)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(status_error(status, "Chunk upload failed", &body))
        }
    }

    /// Stream `upload.source` into a resumable session.
    async fn upload_resumable(
        &self,
        upload: &FileUpload,
        gate: &CancellationGate,
    ) -> Result<DriveFile> {
        gate.check(format!("starting upload of {}", upload.name))?;
        let upload_uri = self.start_resumable_upload(upload).await?;

        if upload.size == 0 {
            gate.check(format!("uploading {}", upload.name))?;
            return self
                .upload_chunk(&upload_uri, Bytes::new(), 0, 0)
                .await?
                .ok_or_else(|| Error::Transfer(format!("Upload of {} did not complete", upload.name)));
        }

        let file = tokio::fs::File::open(&upload.source).await?;
        let mut stream = ReaderStream::with_capacity(file, self.chunk_size);

        let mut bytes_uploaded = 0u64;
        let mut buffer = BytesMut::with_capacity(self.chunk_size);
        let mut exhausted = false;

        loop {
            while !exhausted && buffer.len() < self.chunk_size {
                match stream.next().await {
                    Some(data) => buffer.extend_from_slice(&data?),
                    None => exhausted = true,
                }
            }
            if buffer.is_empty() {
                break;
            }

            let take = buffer.len().min(self.chunk_size);
            let chunk = buffer.split_to(take).freeze();
            if bytes_uploaded + chunk.len() as u64 > upload.size {
                return Err(Error::Transfer(format!(
                    "{} grew while uploading (expected {} bytes)",
                    upload.name, upload.size
                )));
            }

            gate.check(format!(
                "uploading {} ({} of {} bytes sent)",
                upload.name, bytes_uploaded, upload.size
            ))?;

            let start = bytes_uploaded;
            let result = self
                .chunk_retry
                .execute(|| self.upload_chunk(&upload_uri, chunk.clone(), start, upload.size))
                .await?;

            bytes_uploaded += chunk.len() as u64;
            debug!("{}: {}/{} bytes", upload.name, bytes_uploaded, upload.size);

            if let Some(file) = result {
                return Ok(file);
            }
        }

        Err(Error::Transfer(format!(
            "Upload of {} did not complete ({} of {} bytes sent)",
            upload.name, bytes_uploaded, upload.size
        )))
    }

    /// Handle API response with error checking.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();

        if status.is_success() {
            response
                .json()
                .await
                .map_err(|e| Error::Network(format!("Failed to parse response: {}", e)))
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(status_error(status, "API error", &body))
        }
    }
}

fn build_http(user_agent: &str) -> Result<Client> {
    // 308 is the resumable "continue" signal, never a redirect to follow
    Client::builder()
        .user_agent(user_agent)
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))
}

fn status_error(status: StatusCode, context: &str, body: &str) -> Error {
    match status {
        StatusCode::NOT_FOUND => Error::NotFound(format!("{}: resource not found", context)),
        StatusCode::UNAUTHORIZED => {
            Error::Authentication(format!("{}: invalid or expired token", context))
        }
        StatusCode::FORBIDDEN => Error::PermissionDenied(format!("{}: {}", context, body)),
        s if s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS => {
            Error::Network(format!("{}: {} - {}", context, s, body))
        }
        s => Error::Transfer(format!("{}: {} - {}", context, s, body)),
    }
}

#[async_trait]
impl DriveApi for DriveClient {
    fn name(&self) -> &str {
        "gdrive"
    }

    async fn find_folder(
        &self,
        name: &str,
        parent: &RemoteFolderId,
    ) -> Result<Option<RemoteItem>> {
        let url = format!("{}/files", self.api_base);
        let auth = self.auth_header().await?;

        let query = format!(
            "name = '{}' and mimeType = '{}' and '{}' in parents and trashed = false",
            escape_query_literal(name),
            FOLDER_MIME_TYPE,
            escape_query_literal(parent.as_str())
        );

        let response = self
            .http
            .get(&url)
            .header(header::AUTHORIZATION, auth)
            .query(&[
                ("q", query.as_str()),
                ("fields", LIST_FIELDS),
                ("pageSize", "1"),
                ("spaces", "drive"),
                ("supportsAllDrives", "true"),
                ("includeItemsFromAllDrives", "true"),
            ])
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to find folder: {}", e)))?;

        let list_response: FileListResponse = self.handle_response(response).await?;
        Ok(list_response.files.into_iter().next().map(RemoteItem::from))
    }

    async fn create_folder(&self, name: &str, parent: &RemoteFolderId) -> Result<RemoteItem> {
        let url = format!("{}/files", self.api_base);
        let auth = self.auth_header().await?;

        let metadata = serde_json::json!({
            "name": name,
            "mimeType": FOLDER_MIME_TYPE,
            "parents": [parent.as_str()],
        });

        let response = self
            .http
            .post(&url)
            .header(header::AUTHORIZATION, auth)
            .query(&[("fields", ITEM_FIELDS), ("supportsAllDrives", "true")])
            .json(&metadata)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to create folder: {}", e)))?;

        let file: DriveFile = self.handle_response(response).await?;
        Ok(file.into())
    }

    async fn create_file_resumable(
        &self,
        upload: &FileUpload,
        gate: &CancellationGate,
    ) -> Result<RemoteItem> {
        self.upload_resumable(upload, gate).await.map(RemoteItem::from)
    }

    async fn grant_permission(&self, item_id: &str, grant: &PermissionGrant) -> Result<()> {
        let url = format!("{}/files/{}/permissions", self.api_base, item_id);
        let auth = self.auth_header().await?;
        let notify = if grant.send_notification { "true" } else { "false" };

        let response = self
            .http
            .post(&url)
            .header(header::AUTHORIZATION, auth)
            .query(&[
                ("sendNotificationEmail", notify),
                ("supportsAllDrives", "true"),
            ])
            .json(grant)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to grant permission: {}", e)))?;

        let _: serde_json::Value = self.handle_response(response).await?;
        Ok(())
    }
}
