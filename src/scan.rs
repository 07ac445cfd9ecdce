//! Directory listings for the staging tree.
//!
//! Every listing is sorted by raw file name. The producer names leaf
//! directories and segments so that this order is also creation order; the
//! engine relies on that and never looks at timestamps to recover order.

use std::ffi::{OsStr, OsString};
use std::path::Path;

use anyhow::{Context, Result};

/// Channel directories directly under the staging root.
pub fn list_channels(staging_root: &Path) -> Result<Vec<OsString>> {
    list_dirs(staging_root)
}

/// Time-bucket subdirectories of a channel, oldest first.
pub fn list_leaf_dirs(channel_dir: &Path) -> Result<Vec<OsString>> {
    list_dirs(channel_dir)
}

/// Data segments of a leaf directory, oldest first.
pub fn list_segments(leaf_dir: &Path, extension: &str) -> Result<Vec<OsString>> {
    list_files_with_extension(leaf_dir, extension)
}

/// Channel-wide metadata files sitting next to the leaf directories.
pub fn list_metadata_files(channel_dir: &Path, extension: &str) -> Result<Vec<OsString>> {
    list_files_with_extension(channel_dir, extension)
}

pub fn dir_is_empty(dir: &Path) -> Result<bool> {
    let mut entries =
        std::fs::read_dir(dir).with_context(|| format!("list directory {}", dir.display()))?;
    Ok(entries.next().is_none())
}

fn list_dirs(dir: &Path) -> Result<Vec<OsString>> {
    let mut names = Vec::new();
    for entry in
        std::fs::read_dir(dir).with_context(|| format!("list directory {}", dir.display()))?
    {
        let entry = entry.with_context(|| format!("list directory {}", dir.display()))?;
        if entry.path().is_dir() {
            names.push(entry.file_name());
        }
    }
    names.sort_unstable();
    Ok(names)
}

fn list_files_with_extension(dir: &Path, extension: &str) -> Result<Vec<OsString>> {
    let mut names = Vec::new();
    for entry in
        std::fs::read_dir(dir).with_context(|| format!("list directory {}", dir.display()))?
    {
        let entry = entry.with_context(|| format!("list directory {}", dir.display()))?;
        let name = entry.file_name();
        if !matches_extension(&name, extension) {
            continue;
        }
        if entry.path().is_file() {
            names.push(name);
        }
    }
    names.sort_unstable();
    Ok(names)
}

/// Shell-glob `*.<ext>` semantics: hidden names never match.
fn matches_extension(name: &OsStr, extension: &str) -> bool {
    let bytes = name.as_encoded_bytes();
    if bytes.first() == Some(&b'.') {
        return false;
    }
    Path::new(name).extension() == Some(OsStr::new(extension))
}
