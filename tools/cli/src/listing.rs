//! Non-recursive directory listing.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::fs;
use std::path::Path;

/// List the entries of `dir`, sorted by name.
///
/// Hidden entries are skipped unless `all` is set. With `long` every line
/// reads `type size mtime name`.
pub fn list_directory(dir: &Path, all: bool, long: bool) -> Result<Vec<String>> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .with_context(|| format!("Cannot read directory {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| all || !name.starts_with('.'))
        .collect();
    names.sort();

    if !long {
        return Ok(names);
    }

    Ok(names
        .into_iter()
        .map(|name| long_line(&dir.join(&name), &name))
        .collect())
}

fn long_line(path: &Path, name: &str) -> String {
    let metadata = match fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(_) => return format!("? {:>10} {:16} {}", "?", "?", name),
    };

    let kind = if metadata.is_dir() {
        'd'
    } else if path.is_symlink() {
        'l'
    } else {
        '-'
    };
    let modified = metadata
        .modified()
        .map(|time| DateTime::<Local>::from(time).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|_| "?".to_string());

    format!("{} {:>10} {} {}", kind, metadata.len(), modified, name)
}
