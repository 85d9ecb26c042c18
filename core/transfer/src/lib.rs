//! Upload orchestration for driveup.
//!
//! This crate turns an [`UploadOptions`] into remote items:
//! - Deciding once per run whether a source is a file, an archive, a
//!   mirrored tree or a flat set of files
//! - Building scoped temporary archives
//! - Find-or-create of remote folders with a per-run cache
//! - Sequential, cancellable transfers with per-item outcomes
//! - Optional sharing of every uploaded item

pub mod archive;
pub mod executor;
pub mod options;
pub mod progress;
pub mod report;
pub mod resolver;
pub mod sharing;
pub mod target;
pub mod uploader;

pub use archive::{ArchiveBuilder, FileAddedHook, ScopedArchive};
pub use executor::{detect_mime, ItemOutcome, StopReason, TransferExecutor, TransferReport};
pub use options::{CredentialMode, Layout, Settings, UploadOptions};
pub use progress::{LogProgress, NoProgress, ProgressSink};
pub use report::{RunStatus, RunSummary};
pub use resolver::RemoteFolderResolver;
pub use sharing::{ShareOutcome, SharingPolicy};
pub use target::UploadTarget;
pub use uploader::{connect, upload, Uploader};
