//! Executes one upload target against the remote API.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use driveup_common::{CancellationGate, Error, RelativeDir, RemoteFolderId, Result, UploadResult};
use driveup_storage::{DriveApi, FileUpload, RemoteItem};

use crate::archive::ArchiveBuilder;
use crate::progress::{NoProgress, ProgressSink};
use crate::resolver::RemoteFolderResolver;
use crate::sharing::{ShareOutcome, SharingPolicy};
use crate::target::{list_files, UploadTarget};

const ARCHIVE_MIME_TYPE: &str = "application/zip";
const FALLBACK_MIME_TYPE: &str = "application/octet-stream";

/// Result of one attempted item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Uploaded; sharing may still have failed.
    Uploaded {
        result: UploadResult,
        share: ShareOutcome,
    },
    /// Skipped after an error.
    Failed { name: String, error: String },
}

/// Why a multi-file transfer stopped early.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The gate tripped at this point.
    Cancelled(String),
    /// An error that ends the whole run.
    Aborted(String),
}

/// Per-item outcomes of one transfer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferReport {
    outcomes: Vec<ItemOutcome>,
    stopped: Option<StopReason>,
}

impl TransferReport {
    /// All outcomes in attempt order.
    pub fn outcomes(&self) -> &[ItemOutcome] {
        &self.outcomes
    }

    /// Completed uploads in order.
    pub fn results(&self) -> Vec<UploadResult> {
        self.outcomes
            .iter()
            .filter_map(|outcome| match outcome {
                ItemOutcome::Uploaded { result, .. } => Some(result.clone()),
                ItemOutcome::Failed { .. } => None,
            })
            .collect()
    }

    /// Number of completed uploads.
    pub fn uploaded_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, ItemOutcome::Uploaded { .. }))
            .count()
    }

    /// `(name, error)` of every skipped item.
    pub fn failures(&self) -> Vec<(&str, &str)> {
        self.outcomes
            .iter()
            .filter_map(|outcome| match outcome {
                ItemOutcome::Failed { name, error } => Some((name.as_str(), error.as_str())),
                ItemOutcome::Uploaded { .. } => None,
            })
            .collect()
    }

    /// Why the transfer stopped early, if it did.
    pub fn stopped(&self) -> Option<&StopReason> {
        self.stopped.as_ref()
    }

    /// Whether the gate ended the transfer.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.stopped, Some(StopReason::Cancelled(_)))
    }
}

/// Uploads a single file, an archive, or a directory of files.
pub struct TransferExecutor {
    api: Arc<dyn DriveApi>,
    resolver: RemoteFolderResolver,
    sharing: SharingPolicy,
    archive: ArchiveBuilder,
    progress: Arc<dyn ProgressSink>,
    create_parent_folder: bool,
}

impl TransferExecutor {
    /// Create an executor without sharing or progress reporting.
    pub fn new(api: Arc<dyn DriveApi>) -> Self {
        Self {
            resolver: RemoteFolderResolver::new(api.clone()),
            sharing: SharingPolicy::new(api.clone(), None),
            archive: ArchiveBuilder::new(),
            progress: Arc::new(NoProgress),
            create_parent_folder: true,
            api,
        }
    }

    /// Share every uploaded item with `email`.
    pub fn with_share_email(mut self, email: Option<&str>) -> Self {
        self.sharing = SharingPolicy::new(self.api.clone(), email);
        self
    }

    /// Use this archive builder for directory archives.
    pub fn with_archive_builder(mut self, archive: ArchiveBuilder) -> Self {
        self.archive = archive;
        self
    }

    /// Report progress to `sink`.
    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = sink;
        self
    }

    /// Put directory sources into a remote folder named after them.
    pub fn with_create_parent_folder(mut self, create: bool) -> Self {
        self.create_parent_folder = create;
        self
    }

    /// The folder resolver, for inspecting its cache.
    pub fn resolver(&self) -> &RemoteFolderResolver {
        &self.resolver
    }

    /// Transfer `target` into `parent`.
    ///
    /// A single file or archive is one item, and its failure is the
    /// transfer's failure. Directory files are attempted one by one; a
    /// failed file is recorded and skipped, and a tripped gate stops the
    /// walk with the results collected so far.
    ///
    /// # Errors
    /// - `Cancelled` before the first item completes
    /// - `Transfer` / `RemoteLookup` / `Archive` when a single item fails
    pub async fn transfer(
        &mut self,
        target: &UploadTarget,
        parent: &RemoteFolderId,
        gate: &CancellationGate,
    ) -> Result<TransferReport> {
        let files = match target {
            UploadTarget::DirectoryAsTree(source) => list_files(source, None).await,
            UploadTarget::DirectoryFlat(source) => list_files(source, Some(1)).await,
            _ => Vec::new(),
        };
        let total = match target {
            UploadTarget::DirectoryAsTree(_) | UploadTarget::DirectoryFlat(_) => files.len(),
            _ => 1,
        };
        self.progress.start(total);

        let root = self.upload_root(target, parent, gate).await?;

        match target {
            UploadTarget::SingleFile(path) => {
                let name = file_name(path);
                let mime_type = detect_mime(path).await;
                let item = self.upload_file(path, &name, &mime_type, &root, gate).await?;
                let outcome = self.finish_item(item, gate).await?;
                self.progress.item_done(1, total, &name);
                Ok(single(outcome))
            }
            UploadTarget::DirectoryAsArchive { root: source, archive_name } => {
                let archive = self.archive.build(source, archive_name, gate).await?;
                let uploaded = self
                    .upload_file(archive.path(), archive.name(), ARCHIVE_MIME_TYPE, &root, gate)
                    .await;
                if let Err(e) = archive.close() {
                    warn!("Could not remove temporary archive: {}", e);
                }

                let outcome = self.finish_item(uploaded?, gate).await?;
                self.progress.item_done(1, total, archive_name);
                Ok(single(outcome))
            }
            UploadTarget::DirectoryAsTree(source) => {
                Ok(self.transfer_files(source, &files, true, &root, gate).await)
            }
            UploadTarget::DirectoryFlat(source) => {
                Ok(self.transfer_files(source, &files, false, &root, gate).await)
            }
        }
    }

    async fn upload_root(
        &mut self,
        target: &UploadTarget,
        parent: &RemoteFolderId,
        gate: &CancellationGate,
    ) -> Result<RemoteFolderId> {
        if !target.is_directory() || !self.create_parent_folder {
            return Ok(parent.clone());
        }

        let name = target.folder_name();
        let id = self.resolver.find_or_create(&name, parent, gate).await?;
        debug!("Upload root {} -> {}", name, id);
        Ok(id)
    }

    async fn transfer_files(
        &mut self,
        source: &Path,
        files: &[PathBuf],
        mirror: bool,
        root: &RemoteFolderId,
        gate: &CancellationGate,
    ) -> TransferReport {
        let mut report = TransferReport::default();
        let total = files.len();

        for (index, path) in files.iter().enumerate() {
            let name = file_name(path);

            match self.transfer_one(source, path, &name, mirror, root, gate).await {
                Ok(outcome) => report.outcomes.push(outcome),
                Err(Error::Cancelled(point)) => {
                    info!("Cancelled at {} after {} upload(s)", point, report.uploaded_count());
                    report.stopped = Some(StopReason::Cancelled(point));
                    return report;
                }
                Err(e @ Error::Authentication(_)) => {
                    report.stopped = Some(StopReason::Aborted(e.to_string()));
                    return report;
                }
                Err(e) => {
                    warn!("Skipping {}: {}", path.display(), e);
                    report.outcomes.push(ItemOutcome::Failed {
                        name: name.clone(),
                        error: e.to_string(),
                    });
                }
            }

            self.progress.item_done(index + 1, total, &name);
        }

        report
    }

    async fn transfer_one(
        &mut self,
        source: &Path,
        path: &Path,
        name: &str,
        mirror: bool,
        root: &RemoteFolderId,
        gate: &CancellationGate,
    ) -> Result<ItemOutcome> {
        gate.check(format!("before {}", path.display()))?;

        let parent = if mirror {
            let dir = path.parent().unwrap_or(source);
            let relative = RelativeDir::from_paths(source, dir)?;
            self.resolver.resolve(&relative, root, gate).await?
        } else {
            root.clone()
        };

        let mime_type = detect_mime(path).await;
        let item = self.upload_file(path, name, &mime_type, &parent, gate).await?;
        self.finish_item(item, gate).await
    }

    async fn upload_file(
        &self,
        path: &Path,
        name: &str,
        mime_type: &str,
        parent: &RemoteFolderId,
        gate: &CancellationGate,
    ) -> Result<RemoteItem> {
        let size = tokio::fs::metadata(path).await?.len();
        let upload = FileUpload {
            name: name.to_string(),
            parent: parent.clone(),
            source: path.to_path_buf(),
            mime_type: mime_type.to_string(),
            size,
        };

        gate.check(format!("uploading {}", name))?;
        let item = self
            .api
            .create_file_resumable(&upload, gate)
            .await
            .map_err(|e| match e {
                Error::Cancelled(_) | Error::Authentication(_) => e,
                other => Error::Transfer(format!("{}: {}", name, other)),
            })?;

        info!("Uploaded {} ({} bytes)", item.name, size);
        Ok(item)
    }

    async fn finish_item(&self, item: RemoteItem, gate: &CancellationGate) -> Result<ItemOutcome> {
        let result = UploadResult {
            url: item.share_url(),
            name: item.name,
            id: item.id,
        };

        // the item already exists remotely, so cancellation here keeps it
        let share = match self.sharing.share(&result.id, gate).await {
            Ok(share) => share,
            Err(e) if e.is_cancelled() => ShareOutcome::Failed(e.to_string()),
            Err(e) => return Err(e),
        };

        Ok(ItemOutcome::Uploaded { result, share })
    }
}

fn single(outcome: ItemOutcome) -> TransferReport {
    TransferReport {
        outcomes: vec![outcome],
        stopped: None,
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Sniff the MIME type of a local file.
pub async fn detect_mime(path: &Path) -> String {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        tree_magic_mini::from_filepath(&path).map(|mime| mime.to_string())
    })
    .await
    .ok()
    .flatten()
    .unwrap_or_else(|| FALLBACK_MIME_TYPE.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use driveup_storage::MemoryDrive;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Trips the gate once `after` items were attempted.
    struct TripAfter {
        gate: CancellationGate,
        after: usize,
        seen: AtomicUsize,
    }

    impl ProgressSink for TripAfter {
        fn start(&self, _total: usize) {}

        fn item_done(&self, completed: usize, _total: usize, _name: &str) {
            self.seen.store(completed, Ordering::SeqCst);
            if completed == self.after {
                self.gate.trip();
            }
        }
    }

    /// Remembers the announced total.
    #[derive(Default)]
    struct Totals {
        announced: AtomicUsize,
    }

    impl ProgressSink for Totals {
        fn start(&self, total: usize) {
            self.announced.store(total, Ordering::SeqCst);
        }

        fn item_done(&self, _completed: usize, _total: usize, _name: &str) {}
    }

    fn five_files(root: &Path) {
        std::fs::create_dir_all(root.join("a/b")).unwrap();
        std::fs::create_dir_all(root.join("c")).unwrap();
        for (path, body) in [
            ("1.txt", "one"),
            ("a/2.txt", "two"),
            ("a/b/3.txt", "three"),
            ("a/b/4.txt", "four"),
            ("c/5.txt", "five"),
        ] {
            std::fs::write(root.join(path), body).unwrap();
        }
    }

    fn executor(drive: &MemoryDrive) -> TransferExecutor {
        TransferExecutor::new(Arc::new(drive.clone()))
    }

    #[tokio::test]
    async fn test_single_file() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("frame.txt");
        std::fs::write(&file, "pixels").unwrap();
        let drive = MemoryDrive::new();

        let report = executor(&drive)
            .transfer(
                &UploadTarget::SingleFile(file),
                &RemoteFolderId::root(),
                &CancellationGate::new(),
            )
            .await
            .unwrap();

        let results = report.results();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name, "frame.txt");
        assert_eq!(drive.parent_of(&results[0].id).unwrap(), "root");
        assert_eq!(drive.calls().create_folder, 0);
    }

    #[tokio::test]
    async fn test_tree_mirrors_folders() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("renders");
        five_files(&root);
        let drive = MemoryDrive::new();
        let mut executor = executor(&drive);

        let report = executor
            .transfer(
                &UploadTarget::DirectoryAsTree(root),
                &RemoteFolderId::root(),
                &CancellationGate::new(),
            )
            .await
            .unwrap();

        assert_eq!(report.uploaded_count(), 5);
        // renders, a, a/b, c
        let mut names: Vec<String> = drive.folders().into_iter().map(|(n, _)| n).collect();
        names.sort();
        assert_eq!(names, vec!["a", "b", "c", "renders"]);
        // one find per distinct directory prefix plus the upload root
        assert_eq!(drive.calls().find_folder, 4);
        assert_eq!(executor.resolver().cached_len(), 3);

        let three = report.results().into_iter().find(|r| r.name == "3.txt").unwrap();
        let b = drive.parent_of(&three.id).unwrap();
        let a = drive.parent_of(&b).unwrap();
        let renders = drive.parent_of(&a).unwrap();
        assert_eq!(drive.parent_of(&renders).unwrap(), "root");
    }

    #[tokio::test]
    async fn test_tree_twice_creates_no_duplicates() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("renders");
        five_files(&root);
        let drive = MemoryDrive::new();
        let target = UploadTarget::DirectoryAsTree(root);
        let gate = CancellationGate::new();

        executor(&drive)
            .transfer(&target, &RemoteFolderId::root(), &gate)
            .await
            .unwrap();
        let folders = drive.folders().len();
        let created = drive.calls().create_folder;

        executor(&drive)
            .transfer(&target, &RemoteFolderId::root(), &gate)
            .await
            .unwrap();

        assert_eq!(drive.folders().len(), folders);
        assert_eq!(drive.calls().create_folder, created);
    }

    #[tokio::test]
    async fn test_one_failure_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("renders");
        five_files(&root);
        let drive = MemoryDrive::new();
        drive.fail_upload("3.txt");

        let report = executor(&drive)
            .transfer(
                &UploadTarget::DirectoryAsTree(root),
                &RemoteFolderId::root(),
                &CancellationGate::new(),
            )
            .await
            .unwrap();

        assert_eq!(report.uploaded_count(), 4);
        assert_eq!(report.failures().len(), 1);
        assert_eq!(report.failures()[0].0, "3.txt");
        assert!(report.stopped().is_none());
    }

    #[tokio::test]
    async fn test_cancel_mid_walk_keeps_completed() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("renders");
        five_files(&root);
        let drive = MemoryDrive::new();
        let gate = CancellationGate::new();
        let sink = Arc::new(TripAfter {
            gate: gate.clone(),
            after: 2,
            seen: AtomicUsize::new(0),
        });

        let report = executor(&drive)
            .with_progress(sink.clone())
            .transfer(&UploadTarget::DirectoryAsTree(root), &RemoteFolderId::root(), &gate)
            .await
            .unwrap();

        assert!(report.is_cancelled());
        assert_eq!(report.results().len(), 2);
        assert_eq!(drive.files().len(), 2);
        assert_eq!(sink.seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_flat_uploads_top_level_only() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("renders");
        five_files(&root);
        let drive = MemoryDrive::new();

        let report = executor(&drive)
            .with_create_parent_folder(false)
            .transfer(
                &UploadTarget::DirectoryFlat(root),
                &RemoteFolderId::root(),
                &CancellationGate::new(),
            )
            .await
            .unwrap();

        assert_eq!(report.results().len(), 1);
        assert_eq!(report.results()[0].name, "1.txt");
        assert!(drive.folders().is_empty());
    }

    #[tokio::test]
    async fn test_archive_is_uploaded_and_removed() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("renders");
        five_files(&root);
        let scratch = tmp.path().join("scratch");
        std::fs::create_dir(&scratch).unwrap();
        let drive = MemoryDrive::new();

        let report = executor(&drive)
            .with_archive_builder(ArchiveBuilder::new().in_dir(&scratch))
            .transfer(
                &UploadTarget::DirectoryAsArchive {
                    root,
                    archive_name: "renders_20240101_000000.zip".to_string(),
                },
                &RemoteFolderId::root(),
                &CancellationGate::new(),
            )
            .await
            .unwrap();

        let results = report.results();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name, "renders_20240101_000000.zip");
        assert_eq!(drive.files()[0].mime_type, ARCHIVE_MIME_TYPE);
        assert_eq!(std::fs::read_dir(&scratch).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_failed_archive_upload_is_removed() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("renders");
        five_files(&root);
        let scratch = tmp.path().join("scratch");
        std::fs::create_dir(&scratch).unwrap();
        let drive = MemoryDrive::new();
        drive.fail_upload("broken.zip");

        let result = executor(&drive)
            .with_archive_builder(ArchiveBuilder::new().in_dir(&scratch))
            .transfer(
                &UploadTarget::DirectoryAsArchive {
                    root,
                    archive_name: "broken.zip".to_string(),
                },
                &RemoteFolderId::root(),
                &CancellationGate::new(),
            )
            .await;

        assert!(matches!(result, Err(Error::Transfer(_))));
        assert_eq!(std::fs::read_dir(&scratch).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_share_failure_does_not_fail_upload() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("frame.txt");
        std::fs::write(&file, "pixels").unwrap();
        let drive = MemoryDrive::new();
        drive.fail_permissions();

        let report = executor(&drive)
            .with_share_email(Some("ed@example.com"))
            .transfer(
                &UploadTarget::SingleFile(file),
                &RemoteFolderId::root(),
                &CancellationGate::new(),
            )
            .await
            .unwrap();

        match &report.outcomes()[0] {
            ItemOutcome::Uploaded { share, .. } => {
                assert!(matches!(share, ShareOutcome::Failed(_)))
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_detect_mime_fallback() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("missing.bin");
        assert_eq!(detect_mime(&missing).await, FALLBACK_MIME_TYPE);
    }

    #[tokio::test]
    async fn test_total_matches_walked_files() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("renders");
        five_files(&root);
        let drive = MemoryDrive::new();

        let totals = Arc::new(Totals::default());
        let report = executor(&drive)
            .with_progress(totals.clone())
            .transfer(
                &UploadTarget::DirectoryAsTree(root.clone()),
                &RemoteFolderId::root(),
                &CancellationGate::new(),
            )
            .await
            .unwrap();
        assert_eq!(totals.announced.load(Ordering::SeqCst), 5);
        assert_eq!(report.uploaded_count(), 5);

        let totals = Arc::new(Totals::default());
        executor(&drive)
            .with_progress(totals.clone())
            .transfer(
                &UploadTarget::DirectoryFlat(root),
                &RemoteFolderId::root(),
                &CancellationGate::new(),
            )
            .await
            .unwrap();
        assert_eq!(totals.announced.load(Ordering::SeqCst), 1);
    }
}
