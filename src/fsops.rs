//! Filesystem primitives used by the migrator.
//!
//! Copies go through a sibling `<name>.tmp` file that is fsynced and then
//! renamed over the destination, so a reader of the archive never sees a
//! half-written file under its final name.

use std::fs::{File, FileTimes, Metadata, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

/// Result of trying to remove a drained leaf directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PruneOutcome {
    Removed,
    NotEmpty,
    Missing,
}

/// Copy `src` to `dest` with `cp -a` semantics for a single file: contents,
/// permission bits and access/modification times. Returns bytes copied.
pub fn copy_file_preserving(src: &Path, dest: &Path) -> Result<u64> {
    let tmp = tmp_path_for(dest)?;
    let _ = std::fs::remove_file(&tmp);

    let mut input = File::open(src).with_context(|| format!("open source {}", src.display()))?;
    let src_meta = input
        .metadata()
        .with_context(|| format!("stat source {}", src.display()))?;
    let mut output = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&tmp)
        .with_context(|| format!("create {}", tmp.display()))?;

    let copied = io::copy(&mut input, &mut output)
        .with_context(|| format!("copy {} -> {}", src.display(), tmp.display()))?;
    output
        .set_permissions(src_meta.permissions())
        .with_context(|| format!("set permissions on {}", tmp.display()))?;
    output
        .set_times(file_times(&src_meta))
        .with_context(|| format!("set times on {}", tmp.display()))?;
    output
        .sync_all()
        .with_context(|| format!("fsync {}", tmp.display()))?;
    drop(output);

    std::fs::rename(&tmp, dest)
        .with_context(|| format!("rename {} -> {}", tmp.display(), dest.display()))?;
    fsync_dir(
        dest.parent()
            .ok_or_else(|| anyhow!("archive path has no parent: {}", dest.display()))?,
    )?;
    Ok(copied)
}

/// Create `dest` as a directory carrying the permissions and timestamps of
/// `src`.
pub fn mirror_dir(src: &Path, dest: &Path) -> Result<()> {
    std::fs::create_dir(dest).with_context(|| format!("create directory {}", dest.display()))?;
    copy_dir_attributes(src, dest)
}

/// Apply the permission bits and access/modification times of directory
/// `src` to directory `dest`.
pub fn copy_dir_attributes(src: &Path, dest: &Path) -> Result<()> {
    let src_meta =
        std::fs::metadata(src).with_context(|| format!("stat directory {}", src.display()))?;
    let dir = File::open(dest).with_context(|| format!("open directory {}", dest.display()))?;
    dir.set_times(file_times(&src_meta))
        .with_context(|| format!("set times on {}", dest.display()))?;
    std::fs::set_permissions(dest, src_meta.permissions())
        .with_context(|| format!("set permissions on {}", dest.display()))?;
    Ok(())
}

pub fn remove_file(path: &Path) -> Result<()> {
    std::fs::remove_file(path).with_context(|| format!("remove {}", path.display()))
}

/// Remove `path` if it is an empty directory. A non-empty directory is not an
/// error; it is left for a later cycle.
pub fn remove_dir_if_empty(path: &Path) -> Result<PruneOutcome> {
    match std::fs::remove_dir(path) {
        Ok(()) => Ok(PruneOutcome::Removed),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(PruneOutcome::Missing),
        Err(err) if is_not_empty(&err) => Ok(PruneOutcome::NotEmpty),
        Err(err) => Err(err).with_context(|| format!("remove directory {}", path.display())),
    }
}

fn is_not_empty(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(code) if code == libc::ENOTEMPTY || code == libc::EEXIST)
}

fn file_times(meta: &Metadata) -> FileTimes {
    let mut times = FileTimes::new();
    if let Ok(accessed) = meta.accessed() {
        times = times.set_accessed(accessed);
    }
    if let Ok(modified) = meta.modified() {
        times = times.set_modified(modified);
    }
    times
}

fn tmp_path_for(path: &Path) -> Result<PathBuf> {
    let name = path
        .file_name()
        .ok_or_else(|| anyhow!("missing filename for {}", path.display()))?
        .to_string_lossy();
    Ok(path.with_file_name(format!("{name}.tmp")))
}

fn fsync_dir(path: &Path) -> Result<()> {
    let dir = File::open(path).with_context(|| format!("open directory {}", path.display()))?;
    dir.sync_all()
        .with_context(|| format!("fsync directory {}", path.display()))?;
    Ok(())
}
