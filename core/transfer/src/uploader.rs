//! Orchestrates one upload invocation.

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use driveup_common::{CancellationGate, Error, RemoteFolderId, Result};
use driveup_storage::gdrive::{CredentialStore, DriveClient, ServiceAccountSource};
use driveup_storage::{AccessTokenSource, DriveApi, RetryConfig};

use crate::archive::ArchiveBuilder;
use crate::executor::TransferExecutor;
use crate::options::{CredentialMode, Settings, UploadOptions};
use crate::progress::{LogProgress, ProgressSink};
use crate::report::RunSummary;
use crate::target::UploadTarget;

/// Runs uploads against an already authenticated remote API.
pub struct Uploader {
    api: Arc<dyn DriveApi>,
    settings: Settings,
    archive_dir: Option<PathBuf>,
    progress: Arc<dyn ProgressSink>,
}

impl Uploader {
    /// Create an uploader with default settings and log progress.
    pub fn new(api: Arc<dyn DriveApi>) -> Self {
        Self {
            api,
            settings: Settings::default(),
            archive_dir: None,
            progress: Arc::new(LogProgress),
        }
    }

    /// Use these settings.
    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Build temporary archives under `dir`.
    pub fn with_archive_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.archive_dir = Some(dir.into());
        self
    }

    /// Report progress to `sink`.
    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = sink;
        self
    }

    /// Run one upload. Never fails: errors become the summary's status.
    pub async fn run(&self, options: &UploadOptions, gate: &CancellationGate) -> RunSummary {
        match prepare(options) {
            Ok(target) => self.run_target(options, &target, gate).await,
            Err(e) => logged(RunSummary::from_error(&e)),
        }
    }

    /// Run an upload whose target was already derived from `options`.
    pub async fn run_target(
        &self,
        options: &UploadOptions,
        target: &UploadTarget,
        gate: &CancellationGate,
    ) -> RunSummary {
        // a non-cancellable run watches a gate nobody can trip
        let own_gate;
        let gate = if options.cancellable {
            gate
        } else {
            own_gate = CancellationGate::new();
            &own_gate
        };

        let summary = match self.try_run(options, target, gate).await {
            Ok(summary) => summary,
            Err(e) => RunSummary::from_error(&e),
        };
        logged(summary)
    }

    async fn try_run(
        &self,
        options: &UploadOptions,
        target: &UploadTarget,
        gate: &CancellationGate,
    ) -> Result<RunSummary> {
        let parent = RemoteFolderId::or_root(options.parent());

        gate.check("start of upload")?;
        info!(
            "Uploading {} to {} via {}",
            target.source().display(),
            parent,
            self.api.name()
        );

        let mut archive = ArchiveBuilder::new().with_poll_interval(
            options
                .archive_poll_interval
                .unwrap_or(self.settings.archive_poll_interval),
        );
        if let Some(dir) = &self.archive_dir {
            archive = archive.in_dir(dir);
        }

        let mut executor = TransferExecutor::new(self.api.clone())
            .with_share_email(options.share_address())
            .with_archive_builder(archive)
            .with_progress(self.progress.clone())
            .with_create_parent_folder(options.create_parent_folder);

        let report = executor.transfer(target, &parent, gate).await?;
        Ok(RunSummary::from_report(&report))
    }
}

/// Validate the options and decide what to transfer.
fn prepare(options: &UploadOptions) -> Result<UploadTarget> {
    options.validate()?;
    UploadTarget::derive(options)
}

fn logged(summary: RunSummary) -> RunSummary {
    if summary.is_success() {
        info!("{}", summary.message());
    } else {
        error!("{}", summary.message());
    }
    summary
}

/// Authenticate according to `options` and build the Drive client.
///
/// # Errors
/// - Credential errors from the store or the service-account key
pub async fn connect(
    options: &UploadOptions,
    store: Arc<CredentialStore>,
    settings: &Settings,
) -> Result<Arc<dyn DriveApi>> {
    let tokens: Arc<dyn AccessTokenSource> = match options.credential_mode {
        CredentialMode::OAuth => Arc::new(store.session(options.credential_payload()).await?),
        CredentialMode::ServiceAccount => {
            let payload = options.credential_payload().ok_or_else(|| {
                Error::MissingCredentialConfig("A service account key is required".to_string())
            })?;
            let source = ServiceAccountSource::from_payload(payload).await?;
            info!("Authenticated as {}", source.client_email());
            Arc::new(source)
        }
    };

    let mut client = DriveClient::new(tokens)?
        .with_chunk_size(settings.chunk_size)
        .with_chunk_retry(RetryConfig::new(settings.chunk_retries));
    if let Some(user_agent) = &settings.user_agent {
        client = client.with_user_agent(user_agent)?;
    }

    Ok(Arc::new(client))
}

/// Derive the target, authenticate, then upload.
///
/// The target is decided before any credential activity, so a bad source
/// is reported without touching the network. Never fails: errors become
/// the summary's status.
pub async fn upload(
    options: &UploadOptions,
    store: Arc<CredentialStore>,
    settings: Settings,
    gate: &CancellationGate,
    progress: Arc<dyn ProgressSink>,
) -> RunSummary {
    let target = match prepare(options) {
        Ok(target) => target,
        Err(e) => return logged(RunSummary::from_error(&e)),
    };

    let connected = async {
        if options.cancellable {
            gate.check("before authentication")?;
        }
        connect(options, store, &settings).await
    }
    .await;

    match connected {
        Ok(api) => {
            Uploader::new(api)
                .with_settings(settings)
                .with_progress(progress)
                .run_target(options, &target, gate)
                .await
        }
        Err(e) => logged(RunSummary::from_error(&e)),
    }
}
