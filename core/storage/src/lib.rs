//! Remote storage access for driveup.
//!
//! This module provides the abstract remote API the upload engine talks to
//! ([`DriveApi`]), a Google Drive implementation of it, credential
//! acquisition for that implementation, and an in-memory double used by
//! tests.
//!
//! # Design Principles
//! - The engine only sees [`DriveApi`]; nothing above this crate knows
//!   about HTTP, tokens or query syntax
//! - Content is streamed from disk in chunks, never buffered whole
//! - Each chunk passes through exactly one retry policy

pub mod api;
pub mod gdrive;
pub mod memory;
pub mod retry;

pub use gdrive::{AccessTokenSource, CredentialStore, DriveClient, ServiceAccountSource, TokenManager};
pub use api::{DriveApi, FileUpload, PermissionGrant, RemoteItem, FOLDER_MIME_TYPE};
pub use memory::{CallCounts, MemoryDrive};
pub use retry::{RetryConfig, RetryExecutor};
