//! Deciding what one invocation transfers.

use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

use driveup_common::{Error, Result};

use crate::options::{Layout, UploadOptions};

/// The unit of work for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadTarget {
    /// One regular file.
    SingleFile(PathBuf),
    /// A directory compressed into one archive called `archive_name`.
    DirectoryAsArchive { root: PathBuf, archive_name: String },
    /// A directory mirrored folder by folder.
    DirectoryAsTree(PathBuf),
    /// The top-level files of a directory, without subfolders.
    DirectoryFlat(PathBuf),
}

impl UploadTarget {
    /// Derive the target from the options, before any network call.
    ///
    /// # Errors
    /// - `NotFound` if the source does not exist
    /// - `InvalidInput` if it is neither a file nor a directory
    pub fn derive(options: &UploadOptions) -> Result<Self> {
        Self::derive_at(options, Local::now())
    }

    fn derive_at(options: &UploadOptions, now: DateTime<Local>) -> Result<Self> {
        let path = normalize(&options.source)?;
        let metadata = std::fs::metadata(&path)
            .map_err(|_| Error::NotFound(format!("Path does not exist: {}", path.display())))?;

        if metadata.is_file() {
            return Ok(UploadTarget::SingleFile(path));
        }
        if !metadata.is_dir() {
            return Err(Error::InvalidInput(format!(
                "Not a regular file or directory: {}",
                path.display()
            )));
        }

        Ok(match options.layout {
            Layout::SingleArchive => {
                let archive_name = archive_name(&path, now);
                UploadTarget::DirectoryAsArchive {
                    root: path,
                    archive_name,
                }
            }
            Layout::MirroredTree => UploadTarget::DirectoryAsTree(path),
            Layout::FlatFiles => UploadTarget::DirectoryFlat(path),
        })
    }

    /// The local path the target was derived from.
    pub fn source(&self) -> &Path {
        match self {
            UploadTarget::SingleFile(path)
            | UploadTarget::DirectoryAsTree(path)
            | UploadTarget::DirectoryFlat(path) => path,
            UploadTarget::DirectoryAsArchive { root, .. } => root,
        }
    }

    /// Whether the source is a directory.
    pub fn is_directory(&self) -> bool {
        !matches!(self, UploadTarget::SingleFile(_))
    }

    /// Name of the remote folder a directory source gets.
    pub fn folder_name(&self) -> String {
        base_name(self.source())
    }

}

/// Regular files of a directory target, walked on the blocking pool.
pub(crate) async fn list_files(root: &Path, max_depth: Option<usize>) -> Vec<PathBuf> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || {
        regular_files(&root, max_depth)
            .map(|entry| entry.into_path())
            .collect()
    })
    .await
    .unwrap_or_else(|e| {
        warn!("Directory walk failed: {}", e);
        Vec::new()
    })
}

/// Regular files under `root`, sorted by name, optionally depth-limited.
///
/// Symlinks are followed; entries that cannot be read (including link
/// loops) are skipped.
pub(crate) fn regular_files(
    root: &Path,
    max_depth: Option<usize>,
) -> impl Iterator<Item = walkdir::DirEntry> {
    let mut walker = WalkDir::new(root)
        .min_depth(1)
        .follow_links(true)
        .sort_by_file_name();
    if let Some(depth) = max_depth {
        walker = walker.max_depth(depth);
    }
    walker
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
}

/// `<base>_<YYYYmmdd_HHMMSS>.zip`.
pub fn archive_name(root: &Path, now: DateTime<Local>) -> String {
    format!("{}_{}.zip", base_name(root), now.format("%Y%m%d_%H%M%S"))
}

fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string())
}

/// Expand `~` and make the path absolute without touching symlinks.
pub fn normalize(path: &Path) -> Result<PathBuf> {
    let expanded = match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .ok_or_else(|| Error::InvalidInput("Cannot determine the home directory".to_string()))?
            .join(rest),
        Err(_) => path.to_path_buf(),
    };

    let absolute = std::path::absolute(&expanded)?;

    // drop trailing separators and `.` components so the base name is stable
    Ok(absolute.components().collect())
}
