//! Per-channel results and per-cycle statistics.

use std::fmt;
use std::time::Duration;

/// What one migration pass did to one channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelReport {
    pub channel: String,

    /// Metadata files copied because the archive copy was missing or stale.
    pub metadata_copied: usize,

    /// Segments written to the archive in this pass.
    pub segments_copied: usize,

    /// Segments whose archive copy was already byte-identical (left over
    /// from an interrupted pass); removed from staging without re-copying.
    pub segments_already_archived: usize,

    /// Segments removed from staging after being archived.
    pub segments_deleted: usize,

    /// Segments of the newest leaf directory held back by the retention
    /// window.
    pub segments_retained: usize,

    /// Closed leaf directories removed from staging.
    pub leaves_pruned: usize,

    /// Closed leaf directories that were still non-empty when pruning.
    pub leaves_deferred: usize,

    /// Payload bytes written to the archive.
    pub bytes_copied: u64,
}

impl ChannelReport {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            ..Self::default()
        }
    }

    /// True when the pass changed nothing on either tree.
    pub fn is_noop(&self) -> bool {
        self.metadata_copied == 0
            && self.segments_copied == 0
            && self.segments_deleted == 0
            && self.leaves_pruned == 0
    }
}

/// A channel whose pass ended in an error. Carries the full cause chain.
#[derive(Debug)]
pub struct ChannelFailure {
    pub channel: String,
    pub error: anyhow::Error,
}

impl ChannelFailure {
    pub fn new(channel: impl Into<String>, error: anyhow::Error) -> Self {
        Self {
            channel: channel.into(),
            error,
        }
    }
}

impl fmt::Display for ChannelFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel {}: {:#}", self.channel, self.error)
    }
}

/// Outcome of one channel task, as collected by the engine.
pub type ChannelOutcome = std::result::Result<ChannelReport, ChannelFailure>;

/// Statistics from one drain cycle.
#[derive(Debug, Default)]
pub struct CycleReport {
    /// Sequence number of the cycle, starting at 1.
    pub cycle: u64,

    /// Channels discovered under the staging root.
    pub channels_scanned: usize,

    /// Channels that were not dispatched because shutdown was requested.
    pub channels_skipped: usize,

    /// Successful channel passes, in completion order.
    pub reports: Vec<ChannelReport>,

    /// Failed channel passes, in completion order.
    pub failures: Vec<ChannelFailure>,

    /// Error listing the staging root, if the scan itself failed.
    pub scan_error: Option<String>,

    /// Time taken for the cycle (excluding the inter-cycle sleep).
    pub duration: Duration,
}

impl CycleReport {
    pub fn new(cycle: u64) -> Self {
        Self {
            cycle,
            ..Self::default()
        }
    }

    pub fn record(&mut self, outcome: ChannelOutcome) {
        match outcome {
            Ok(report) => self.reports.push(report),
            Err(failure) => self.failures.push(failure),
        }
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty() || self.scan_error.is_some()
    }

    pub fn report(&self, channel: &str) -> Option<&ChannelReport> {
        self.reports.iter().find(|r| r.channel == channel)
    }

    pub fn failure(&self, channel: &str) -> Option<&ChannelFailure> {
        self.failures.iter().find(|f| f.channel == channel)
    }

    pub fn segments_moved(&self) -> usize {
        self.reports.iter().map(|r| r.segments_deleted).sum()
    }

    pub fn bytes_copied(&self) -> u64 {
        self.reports.iter().map(|r| r.bytes_copied).sum()
    }

    /// True when no channel changed anything and nothing failed.
    pub fn is_idle(&self) -> bool {
        !self.has_failures() && self.reports.iter().all(ChannelReport::is_noop)
    }

    pub fn summary(&self) -> String {
        format!(
            "Cycle: {}, Channels: {}, Moved: {} segments, Copied: {} bytes, Failed: {}, Duration: {:?}",
            self.cycle,
            self.channels_scanned,
            self.segments_moved(),
            self.bytes_copied(),
            self.failures.len(),
            self.duration
        )
    }
}
