//! Upload options and persisted settings.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

use driveup_common::{Error, Result, SecretString};
use driveup_storage::gdrive::DEFAULT_CHUNK_SIZE;

/// Default number of files archived between two cancellation checks.
pub const DEFAULT_ARCHIVE_POLL_INTERVAL: usize = 50;

const SETTINGS_FILE: &str = "settings.json";

/// How a directory source is laid out remotely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layout {
    /// Compress the directory into one archive.
    #[default]
    SingleArchive,
    /// Mirror every subdirectory as a remote folder.
    MirroredTree,
    /// Upload only the top-level files, side by side.
    FlatFiles,
}

/// Which kind of credential authorizes the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialMode {
    /// Installed-app OAuth with a persisted token.
    #[default]
    #[serde(alias = "oauth2")]
    OAuth,
    /// Service-account key.
    ServiceAccount,
}

fn default_true() -> bool {
    true
}

/// Everything one upload invocation needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadOptions {
    /// Local file or directory.
    pub source: PathBuf,
    /// Remote folder to upload into; empty or absent means the drive root.
    #[serde(default)]
    pub parent_id: Option<String>,
    /// Grant this address write access to each uploaded item.
    #[serde(default)]
    pub share_email: Option<String>,
    /// Directory layout.
    #[serde(default)]
    pub layout: Layout,
    /// Credential kind.
    #[serde(default)]
    pub credential_mode: CredentialMode,
    /// Raw credential payload: an OAuth client config or a service-account key.
    #[serde(default)]
    pub credentials: Option<SecretString>,
    /// Create a remote folder named after a directory source first.
    #[serde(default = "default_true")]
    pub create_parent_folder: bool,
    /// Honour the cancellation gate.
    #[serde(default = "default_true")]
    pub cancellable: bool,
    /// Files archived between cancellation checks.
    #[serde(default)]
    pub archive_poll_interval: Option<usize>,
}

impl UploadOptions {
    /// Options for `source` with every other field defaulted.
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            parent_id: None,
            share_email: None,
            layout: Layout::default(),
            credential_mode: CredentialMode::default(),
            credentials: None,
            create_parent_folder: true,
            cancellable: true,
            archive_poll_interval: None,
        }
    }

    /// Parse options from a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::InvalidInput(format!("Invalid upload parameters: {}", e)))
    }

    /// Set the remote parent folder.
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Share each uploaded item with `email`.
    pub fn with_share_email(mut self, email: impl Into<String>) -> Self {
        self.share_email = Some(email.into());
        self
    }

    /// Set the directory layout.
    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.layout = layout;
        self
    }

    /// Set the credential mode.
    pub fn with_credential_mode(mut self, mode: CredentialMode) -> Self {
        self.credential_mode = mode;
        self
    }

    /// Supply a raw credential payload.
    pub fn with_credentials(mut self, payload: impl Into<String>) -> Self {
        self.credentials = Some(SecretString::new(payload));
        self
    }

    /// Enable or disable the parent folder for directory sources.
    pub fn with_create_parent_folder(mut self, create: bool) -> Self {
        self.create_parent_folder = create;
        self
    }

    /// Enable or disable cancellation.
    pub fn with_cancellable(mut self, cancellable: bool) -> Self {
        self.cancellable = cancellable;
        self
    }

    /// Set the archive cancellation poll interval.
    pub fn with_archive_poll_interval(mut self, files: usize) -> Self {
        self.archive_poll_interval = Some(files);
        self
    }

    /// Parent id with blanks treated as absent.
    pub fn parent(&self) -> Option<&str> {
        self.parent_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }

    /// Share address with blanks treated as absent.
    pub fn share_address(&self) -> Option<&str> {
        self.share_email
            .as_deref()
            .map(str::trim)
            .filter(|email| !email.is_empty())
    }

    /// Credential payload with blanks treated as absent.
    pub fn credential_payload(&self) -> Option<&str> {
        self.credentials
            .as_ref()
            .map(|c| c.expose().trim())
            .filter(|c| !c.is_empty())
    }

    /// Check combinations that cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.source.as_os_str().is_empty() {
            return Err(Error::InvalidInput("No source path given".to_string()));
        }
        if self.credential_mode == CredentialMode::ServiceAccount {
            if self.parent().is_none() {
                return Err(Error::InvalidInput(
                    "A service account needs an explicit parent folder id \
                     shared with its client email"
                        .to_string(),
                ));
            }
            if self.credential_payload().is_none() {
                return Err(Error::MissingCredentialConfig(
                    "A service account key is required".to_string(),
                ));
            }
        }
        if self.archive_poll_interval == Some(0) {
            return Err(Error::InvalidInput(
                "Archive poll interval must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Tunables read from `settings.json` in the state directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Files archived between cancellation checks.
    pub archive_poll_interval: usize,
    /// Retries per upload chunk on transient failures.
    pub chunk_retries: u32,
    /// Resumable chunk size in bytes.
    pub chunk_size: usize,
    /// `User-Agent` for API requests.
    pub user_agent: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            archive_poll_interval: DEFAULT_ARCHIVE_POLL_INTERVAL,
            chunk_retries: 0,
            chunk_size: DEFAULT_CHUNK_SIZE,
            user_agent: None,
        }
    }
}

impl Settings {
    /// Load settings from `dir`; missing or malformed files yield defaults.
    pub fn load(dir: &Path) -> Self {
        let path = dir.join(SETTINGS_FILE);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(_) => return Self::default(),
        };

        match serde_json::from_str(&content) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Ignoring malformed {}: {}", path.display(), e);
                Self::default()
            }
        }
    }
}
