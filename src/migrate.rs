//! Per-channel migration from the staging tree to the archive tree.
//!
//! One pass over one channel:
//! - mirror the channel directory into the archive (with its attributes)
//! - refresh metadata files whose archive copy is missing or stale
//! - walk leaf directories oldest first, moving every closed segment
//! - hold back the newest `retention_window` segments of the newest leaf
//! - remove drained leaf directories, except the newest one
//!
//! A segment is deleted from staging only after its archive copy is in
//! place. Processing order guarantees that an interrupted pass leaves
//! staging holding a contiguous suffix of the channel's data.

use std::ffi::OsStr;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use log::{debug, trace, warn};

use crate::compare::needs_copy;
use crate::config::DrainConfig;
use crate::fsops::{self, PruneOutcome};
use crate::report::{ChannelFailure, ChannelOutcome, ChannelReport};
use crate::scan;

/// Read-only migration settings shared by every channel task.
#[derive(Debug, Clone)]
pub struct StreamMigrator {
    staging_root: PathBuf,
    archive_root: PathBuf,
    retention_window: usize,
    segment_extension: String,
    metadata_extension: String,
}

impl StreamMigrator {
    pub fn new(config: &DrainConfig) -> Self {
        Self {
            staging_root: config.staging_root.clone(),
            archive_root: config.archive_root.clone(),
            retention_window: config.retention_window,
            segment_extension: config.segment_extension.clone(),
            metadata_extension: config.metadata_extension.clone(),
        }
    }

    /// Migrate one channel and contain any error or panic as a
    /// [`ChannelFailure`].
    pub fn run(&self, channel: &OsStr) -> ChannelOutcome {
        contain(channel.to_string_lossy().into_owned(), || self.migrate(channel))
    }

    /// Reconcile one channel's staging subtree into the archive.
    pub fn migrate(&self, channel: &OsStr) -> Result<ChannelReport> {
        let src_dir = self.staging_root.join(channel);
        let dest_dir = self.archive_root.join(channel);
        let mut report = ChannelReport::new(channel.to_string_lossy());

        if !src_dir.is_dir() {
            debug!("channel {} vanished before migration", src_dir.display());
            return Ok(report);
        }

        if !dest_dir.is_dir() {
            fsops::mirror_dir(&src_dir, &dest_dir)?;
            debug!("created archive channel {}", dest_dir.display());
        }

        self.copy_metadata(&src_dir, &dest_dir, &mut report)?;

        let leaves = scan::list_leaf_dirs(&src_dir)?;
        let Some(newest) = leaves.len().checked_sub(1) else {
            return Ok(report);
        };

        for (idx, leaf) in leaves.iter().enumerate() {
            let src_leaf = src_dir.join(leaf);
            let dest_leaf = dest_dir.join(leaf);
            let is_newest = idx == newest;

            let segments = scan::list_segments(&src_leaf, &self.segment_extension)?;
            let eligible = if is_newest {
                let count = eligible_in_newest(segments.len(), self.retention_window);
                report.segments_retained += segments.len() - count;
                &segments[..count]
            } else {
                &segments[..]
            };

            // mirror any non-empty leaf, including a newest one that is held back
            if !dest_leaf.is_dir() && (!eligible.is_empty() || !scan::dir_is_empty(&src_leaf)?) {
                fsops::mirror_dir(&src_leaf, &dest_leaf)?;
            }

            for segment in eligible {
                self.move_segment(&src_leaf.join(segment), &dest_leaf.join(segment), &mut report)
                    .with_context(|| format!("move segment {}", src_leaf.join(segment).display()))?;
            }

            if is_newest {
                continue;
            }
            match fsops::remove_dir_if_empty(&src_leaf)? {
                PruneOutcome::Removed => {
                    report.leaves_pruned += 1;
                    debug!("pruned drained leaf {}", src_leaf.display());
                }
                PruneOutcome::NotEmpty => {
                    report.leaves_deferred += 1;
                    warn!("leaf {} not empty after drain, retrying next cycle", src_leaf.display());
                }
                PruneOutcome::Missing => {}
            }
        }

        Ok(report)
    }

    fn copy_metadata(&self, src_dir: &Path, dest_dir: &Path, report: &mut ChannelReport) -> Result<()> {
        for name in scan::list_metadata_files(src_dir, &self.metadata_extension)? {
            let src = src_dir.join(&name);
            let dest = dest_dir.join(&name);
            if needs_copy(&src, &dest)? {
                report.bytes_copied += fsops::copy_file_preserving(&src, &dest)?;
                report.metadata_copied += 1;
                debug!("copied metadata {}", dest.display());
            }
        }
        Ok(())
    }

    fn move_segment(&self, src: &Path, dest: &Path, report: &mut ChannelReport) -> Result<()> {
        if needs_copy(src, dest)? {
            report.bytes_copied += fsops::copy_file_preserving(src, dest)?;
            report.segments_copied += 1;
        } else {
            report.segments_already_archived += 1;
            trace!("archive already holds {}", dest.display());
        }
        fsops::remove_file(src)?;
        report.segments_deleted += 1;
        debug!("archived {}", dest.display());
        Ok(())
    }
}

/// Run `task` for `channel`, turning both its error and any panic into a
/// [`ChannelFailure`].
fn contain<F>(channel: String, task: F) -> ChannelOutcome
where
    F: FnOnce() -> Result<ChannelReport>,
{
    match panic::catch_unwind(AssertUnwindSafe(task)) {
        Ok(Ok(report)) => Ok(report),
        Ok(Err(err)) => Err(ChannelFailure::new(channel, err)),
        Err(payload) => {
            let msg = panic_message(payload.as_ref());
            Err(ChannelFailure::new(
                channel,
                anyhow!("migration panicked: {msg}"),
            ))
        }
    }
}

/// Number of segments of the newest leaf directory that may be moved.
///
/// With `k` segments and window `w`: nothing when `k <= w`, otherwise all
/// but the last `w`.
pub fn eligible_in_newest(count: usize, retention_window: usize) -> usize {
    if count <= retention_window {
        0
    } else {
        count - retention_window
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn retention_window_arithmetic() {
        assert_eq!(eligible_in_newest(0, 2), 0);
        assert_eq!(eligible_in_newest(2, 2), 0);
        assert_eq!(eligible_in_newest(3, 2), 1);
        assert_eq!(eligible_in_newest(10, 2), 8);
        assert_eq!(eligible_in_newest(4, 0), 4);
        assert_eq!(eligible_in_newest(1, usize::MAX), 0);
    }

    #[test]
    fn panic_payloads_are_rendered() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("static message");
        assert_eq!(panic_message(boxed.as_ref()), "static message");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(7u32);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic payload");
    }

    #[test]
    fn panicking_task_becomes_channel_failure() {
        let failure = contain("ch3".to_string(), || -> Result<ChannelReport> {
            panic!("segment index out of range")
        })
        .unwrap_err();
        assert_eq!(failure.channel, "ch3");
        let text = failure.to_string();
        assert!(text.contains("migration panicked"), "{text}");
        assert!(text.contains("segment index out of range"), "{text}");

        let failure = contain("ch4".to_string(), || -> Result<ChannelReport> {
            panic!("{} leaves", 3)
        })
        .unwrap_err();
        assert!(failure.to_string().contains("3 leaves"));
    }

    #[test]
    fn panic_does_not_poison_later_tasks() {
        let _ = contain("ch0".to_string(), || -> Result<ChannelReport> { panic!("boom") });
        let report = contain("ch1".to_string(), || Ok(ChannelReport::new("ch1"))).unwrap();
        assert_eq!(report.channel, "ch1");
    }

    #[test]
    fn task_error_keeps_context_chain() {
        let failure = contain("ch5".to_string(), || -> Result<ChannelReport> {
            Err(anyhow!("disk full")).context("copy /ram/ch5/000/a.h5")
        })
        .unwrap_err();
        let text = failure.to_string();
        assert!(text.contains("copy /ram/ch5/000/a.h5"));
        assert!(text.contains("disk full"));
    }

    #[test]
    fn leaf_mirrors_follow_staging_contents() -> Result<()> {
        let dir = tempdir()?;
        let staging = dir.path().join("ram");
        let archive = dir.path().join("archive");
        let ch = staging.join("ch0");
        std::fs::create_dir_all(ch.join("000"))?;
        std::fs::create_dir_all(ch.join("001"))?;
        std::fs::create_dir_all(ch.join("002"))?;
        std::fs::create_dir_all(&archive)?;
        std::fs::write(ch.join("001").join("a.h5"), b"a")?;
        std::fs::write(ch.join("002").join("b.h5"), b"b")?;

        let migrator = StreamMigrator::new(&DrainConfig::new(&staging, &archive));
        let report = migrator.migrate(OsStr::new("ch0"))?;

        let arch = archive.join("ch0");
        assert!(!arch.join("000").exists(), "empty closed leaf is not mirrored");
        assert_eq!(std::fs::read(arch.join("001").join("a.h5"))?, b"a");
        assert!(arch.join("002").is_dir(), "held-back leaf is mirrored");
        assert!(!arch.join("002").join("b.h5").exists());
        assert_eq!(report.leaves_pruned, 2);
        assert_eq!(report.segments_retained, 1);
        Ok(())
    }

    #[test]
    fn vanished_channel_is_empty_success() -> Result<()> {
        let dir = tempdir()?;
        let staging = dir.path().join("ram");
        let archive = dir.path().join("archive");
        std::fs::create_dir_all(&staging)?;
        std::fs::create_dir_all(&archive)?;

        let migrator = StreamMigrator::new(&DrainConfig::new(&staging, &archive));
        let report = migrator.migrate(OsStr::new("gone"))?;

        assert!(report.is_noop());
        assert!(!archive.join("gone").exists());
        Ok(())
    }

    #[test]
    fn channel_without_leaves_only_copies_metadata() -> Result<()> {
        let dir = tempdir()?;
        let staging = dir.path().join("ram");
        let archive = dir.path().join("archive");
        std::fs::create_dir_all(staging.join("ch0"))?;
        std::fs::create_dir_all(&archive)?;
        std::fs::write(staging.join("ch0").join("metadata.h5"), b"props")?;

        let migrator = StreamMigrator::new(&DrainConfig::new(&staging, &archive));
        let report = migrator.migrate(OsStr::new("ch0"))?;

        assert_eq!(report.metadata_copied, 1);
        assert_eq!(std::fs::read(archive.join("ch0").join("metadata.h5"))?, b"props");
        assert!(staging.join("ch0").join("metadata.h5").exists());
        Ok(())
    }

    #[test]
    fn run_wraps_errors_with_channel_name() -> Result<()> {
        let dir = tempdir()?;
        let staging = dir.path().join("ram");
        let archive = dir.path().join("archive");
        std::fs::create_dir_all(staging.join("ch0"))?;
        std::fs::create_dir_all(&archive)?;
        // a regular file where the archive channel directory should go
        std::fs::write(archive.join("ch0"), b"")?;

        let migrator = StreamMigrator::new(&DrainConfig::new(&staging, &archive));
        let failure = migrator.run(OsStr::new("ch0")).unwrap_err();

        assert_eq!(failure.channel, "ch0");
        assert!(failure.to_string().contains("create directory"));
        Ok(())
    }
}
