//! Common utilities and types shared across the driveup crates.
//!
//! This module provides the error taxonomy, the cooperative cancellation
//! gate, and the small value types passed between the credential, storage
//! and transfer layers.

pub mod cancel;
pub mod error;
pub mod types;

pub use cancel::CancellationGate;
pub use error::{Error, Result};
pub use types::{RelativeDir, RemoteFolderId, SecretString, UploadResult};
