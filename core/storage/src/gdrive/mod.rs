//! Google Drive backend.
//!
//! - OAuth2 credentials persisted in a state directory, refreshed on expiry
//! - Service-account tokens through `yup-oauth2`
//! - Resumable chunked uploads streamed from disk

pub mod auth;
pub mod client;
pub mod consent;
pub mod credentials;
pub mod service_account;

pub use auth::{
    AccessTokenSource, Authorizer, ClientConfig, Credential, OAuthAuthorizer, TokenManager,
    DRIVE_SCOPE,
};
pub use client::{escape_query_literal, DriveClient, DEFAULT_CHUNK_SIZE};
pub use consent::LoopbackConsent;
pub use credentials::{default_state_dir, CredentialStore};
pub use service_account::ServiceAccountSource;
