//! Temporary zip archives of a directory.
//!
//! The archive lives in its own temporary directory which is removed when
//! the [`ScopedArchive`] is dropped, so every exit path of the upload
//! (success, error, cancellation) cleans it up.

use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use driveup_common::{CancellationGate, Error, RelativeDir, Result};

use crate::options::DEFAULT_ARCHIVE_POLL_INTERVAL;
use crate::target::regular_files;

/// Called with the running file count after each file is added.
pub type FileAddedHook = Arc<dyn Fn(usize) + Send + Sync>;

/// Builds a compressed archive of a directory tree.
#[derive(Clone)]
pub struct ArchiveBuilder {
    poll_interval: usize,
    temp_root: Option<PathBuf>,
    on_file_added: Option<FileAddedHook>,
}

impl fmt::Debug for ArchiveBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveBuilder")
            .field("poll_interval", &self.poll_interval)
            .field("temp_root", &self.temp_root)
            .finish_non_exhaustive()
    }
}

impl Default for ArchiveBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveBuilder {
    /// Create a builder using the system temporary directory.
    pub fn new() -> Self {
        Self {
            poll_interval: DEFAULT_ARCHIVE_POLL_INTERVAL,
            temp_root: None,
            on_file_added: None,
        }
    }

    /// Check the cancellation gate every `files` files.
    pub fn with_poll_interval(mut self, files: usize) -> Self {
        self.poll_interval = files.max(1);
        self
    }

    /// Create scoped archives under `dir` instead of the system temp dir.
    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_root = Some(dir.into());
        self
    }

    /// Observe archiving progress, one call per added file.
    pub fn on_file_added(mut self, hook: FileAddedHook) -> Self {
        self.on_file_added = Some(hook);
        self
    }

    /// Archive every regular file under `source` into `archive_name`.
    ///
    /// Entry names are paths relative to `source`, `/`-separated.
    ///
    /// # Errors
    /// - `Cancelled` if the gate trips during the walk
    /// - `Archive` / `Io` on write failures
    pub async fn build(
        &self,
        source: &Path,
        archive_name: &str,
        gate: &CancellationGate,
    ) -> Result<ScopedArchive> {
        gate.check(format!("archiving {}", source.display()))?;

        let builder = self.clone();
        let source = source.to_path_buf();
        let archive_name = archive_name.to_string();
        let gate = gate.clone();

        tokio::task::spawn_blocking(move || builder.build_blocking(&source, &archive_name, &gate))
            .await
            .map_err(|e| Error::Archive(format!("Archive task failed: {}", e)))?
    }

    fn build_blocking(
        &self,
        source: &Path,
        archive_name: &str,
        gate: &CancellationGate,
    ) -> Result<ScopedArchive> {
        let dir = match &self.temp_root {
            Some(root) => tempfile::Builder::new().prefix("driveup-").tempdir_in(root)?,
            None => tempfile::Builder::new().prefix("driveup-").tempdir()?,
        };
        let path = dir.path().join(archive_name);

        let file = File::create(&path)?;
        let mut zip = ZipWriter::new(BufWriter::new(file));
        let base = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .unix_permissions(0o644);

        let mut file_count = 0usize;
        for entry in regular_files(source, None) {
            if file_count % self.poll_interval == 0 {
                gate.check(format!(
                    "archiving {} ({} files added)",
                    source.display(),
                    file_count
                ))?;
            }

            let parent = entry.path().parent().unwrap_or(source);
            let relative = RelativeDir::from_paths(source, parent)?;
            let name = entry.file_name().to_string_lossy();
            let entry_name = if relative.is_root() {
                name.into_owned()
            } else {
                format!("{}/{}", relative, name)
            };

            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            let options = base.large_file(size >= u32::MAX as u64);

            zip.start_file(entry_name.as_str(), options)
                .map_err(|e| Error::Archive(format!("Cannot add {}: {}", entry_name, e)))?;
            let mut input = File::open(entry.path())?;
            io::copy(&mut input, &mut zip)?;

            debug!("Archived {}", entry_name);
            file_count += 1;
            if let Some(hook) = &self.on_file_added {
                hook(file_count);
            }
        }

        let writer = zip
            .finish()
            .map_err(|e| Error::Archive(format!("Cannot finish archive: {}", e)))?;
        writer
            .into_inner()
            .map_err(|e| Error::Archive(format!("Cannot flush archive: {}", e)))?
            .sync_all()?;

        let size = std::fs::metadata(&path)?.len();
        info!(
            "Archived {} files from {} ({} bytes)",
            file_count,
            source.display(),
            size
        );

        Ok(ScopedArchive {
            dir,
            path,
            name: archive_name.to_string(),
            size,
            file_count,
        })
    }
}

/// An archive file that is deleted together with its temporary directory.
#[derive(Debug)]
pub struct ScopedArchive {
    dir: TempDir,
    path: PathBuf,
    name: String,
    size: u64,
    file_count: usize,
}

impl ScopedArchive {
    /// Path of the archive file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name of the archive.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Archive size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Number of files in the archive.
    pub fn file_count(&self) -> usize {
        self.file_count
    }

    /// Remove the archive now, reporting failures.
    pub fn close(self) -> Result<()> {
        self.dir.close()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::io::Read;

    fn source_tree(root: &Path) {
        std::fs::create_dir_all(root.join("shots/day 1")).unwrap();
        std::fs::create_dir_all(root.join("empty")).unwrap();
        std::fs::write(root.join("readme.txt"), b"hello").unwrap();
        std::fs::write(root.join("shots/a.png"), b"aaaa").unwrap();
        std::fs::write(root.join("shots/day 1/b.png"), b"bbbb").unwrap();
    }

    fn entry_names(path: &Path) -> BTreeSet<String> {
        let mut archive = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
        (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_entries_are_relative() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("renders");
        source_tree(&source);

        let archive = ArchiveBuilder::new()
            .in_dir(tmp.path())
            .build(&source, "renders_1.zip", &CancellationGate::new())
            .await
            .unwrap();

        let names = entry_names(archive.path());
        let expected: BTreeSet<String> = ["readme.txt", "shots/a.png", "shots/day 1/b.png"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(names, expected);
        assert!(names.iter().all(|n| !n.starts_with('/')));
        assert!(names
            .iter()
            .all(|n| !n.contains(&*tmp.path().to_string_lossy())));
        assert_eq!(archive.file_count(), 3);
        assert_eq!(archive.name(), "renders_1.zip");
    }

    #[tokio::test]
    async fn test_content_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("renders");
        source_tree(&source);

        let archive = ArchiveBuilder::new()
            .in_dir(tmp.path())
            .build(&source, "out.zip", &CancellationGate::new())
            .await
            .unwrap();

        let mut zip = zip::ZipArchive::new(File::open(archive.path()).unwrap()).unwrap();
        let mut content = String::new();
        zip.by_name("shots/day 1/b.png")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "bbbb");
    }

    #[tokio::test]
    async fn test_removed_on_drop_and_close() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("renders");
        source_tree(&source);
        let builder = ArchiveBuilder::new().in_dir(tmp.path());
        let gate = CancellationGate::new();

        let archive = builder.build(&source, "a.zip", &gate).await.unwrap();
        let path = archive.path().to_path_buf();
        assert!(path.exists());
        drop(archive);
        assert!(!path.exists());

        let archive = builder.build(&source, "b.zip", &gate).await.unwrap();
        let path = archive.path().to_path_buf();
        archive.close().unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_cancelled_build_leaves_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("renders");
        source_tree(&source);
        let scratch = tmp.path().join("scratch");
        std::fs::create_dir(&scratch).unwrap();

        let gate = CancellationGate::new();
        gate.trip();
        let result = ArchiveBuilder::new()
            .in_dir(&scratch)
            .build(&source, "c.zip", &gate)
            .await;

        assert!(matches!(result, Err(Error::Cancelled(_))));
        assert_eq!(std::fs::read_dir(&scratch).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_during_walk_leaves_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("renders");
        source_tree(&source);
        let scratch = tmp.path().join("scratch");
        std::fs::create_dir(&scratch).unwrap();

        let gate = CancellationGate::new();
        let tripper = gate.clone();
        let result = ArchiveBuilder::new()
            .in_dir(&scratch)
            .with_poll_interval(1)
            .on_file_added(Arc::new(move |added| {
                if added == 2 {
                    tripper.trip();
                }
            }))
            .build(&source, "d.zip", &gate)
            .await;

        match result {
            Err(Error::Cancelled(point)) => assert!(point.contains("2 files added")),
            other => panic!("expected cancellation, got {:?}", other),
        }
        assert_eq!(std::fs::read_dir(&scratch).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_empty_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("nothing");
        std::fs::create_dir(&source).unwrap();

        let archive = ArchiveBuilder::new()
            .in_dir(tmp.path())
            .build(&source, "nothing.zip", &CancellationGate::new())
            .await
            .unwrap();

        assert_eq!(archive.file_count(), 0);
        assert!(entry_names(archive.path()).is_empty());
    }
}
