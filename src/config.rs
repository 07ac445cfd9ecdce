//! Drain configuration.
//!
//! Defines the two tree roots plus the policy knobs that a deployment may
//! want to tune: retention window, file extensions, cycle interval and pool
//! size.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

pub const DEFAULT_RETENTION_WINDOW: usize = 2;
pub const DEFAULT_EXTENSION: &str = "h5";
const DEFAULT_CYCLE_INTERVAL: Duration = Duration::from_secs(1);

/// Configuration for a [`crate::engine::DrainEngine`].
#[derive(Debug, Clone)]
pub struct DrainConfig {
    /// Fast ring-buffer filesystem the producer writes into.
    pub staging_root: PathBuf,

    /// Durable store that receives closed segments.
    pub archive_root: PathBuf,

    /// Newest segments of the newest leaf directory that are never moved.
    /// Default: 2
    pub retention_window: usize,

    /// Extension (without the dot) of data segments inside leaf directories.
    /// Default: "h5"
    pub segment_extension: String,

    /// Extension (without the dot) of channel-level metadata files.
    /// Default: "h5"
    pub metadata_extension: String,

    /// Pause between two drain cycles.
    /// Default: 1 second
    pub cycle_interval: Duration,

    /// Number of worker threads migrating channels concurrently.
    /// Default: available parallelism
    pub workers: usize,
}

impl DrainConfig {
    pub fn new(staging_root: impl Into<PathBuf>, archive_root: impl Into<PathBuf>) -> Self {
        Self {
            staging_root: staging_root.into(),
            archive_root: archive_root.into(),
            retention_window: DEFAULT_RETENTION_WINDOW,
            segment_extension: DEFAULT_EXTENSION.to_string(),
            metadata_extension: DEFAULT_EXTENSION.to_string(),
            cycle_interval: DEFAULT_CYCLE_INTERVAL,
            workers: default_workers(),
        }
    }

    /// Load a deployment file. Only the two roots are mandatory.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let file: ConfigFile = serde_json::from_str(&text).map_err(|source| Error::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(file.into_config())
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::InvalidConfig("workers must be at least 1".to_string()));
        }
        validate_extension("segment_extension", &self.segment_extension)?;
        validate_extension("metadata_extension", &self.metadata_extension)?;
        Ok(())
    }
}

/// On-disk representation; absent fields fall back to the defaults.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    staging_root: PathBuf,
    archive_root: PathBuf,
    retention_window: Option<usize>,
    segment_extension: Option<String>,
    metadata_extension: Option<String>,
    cycle_interval_ms: Option<u64>,
    workers: Option<usize>,
}

impl ConfigFile {
    fn into_config(self) -> DrainConfig {
        let mut config = DrainConfig::new(self.staging_root, self.archive_root);
        if let Some(window) = self.retention_window {
            config.retention_window = window;
        }
        if let Some(ext) = self.segment_extension {
            config.segment_extension = ext;
        }
        if let Some(ext) = self.metadata_extension {
            config.metadata_extension = ext;
        }
        if let Some(ms) = self.cycle_interval_ms {
            config.cycle_interval = Duration::from_millis(ms);
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        config
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn validate_extension(field: &str, value: &str) -> Result<()> {
    if value.is_empty() || value.starts_with('.') || value.contains('/') {
        return Err(Error::InvalidConfig(format!(
            "{field} must be a bare extension, got {value:?}"
        )));
    }
    Ok(())
}
