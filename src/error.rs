use std::path::PathBuf;

use thiserror::Error;

/// Errors that stop the engine before it can start draining.
///
/// Anything that goes wrong while a channel is being migrated is reported
/// through [`crate::report::ChannelFailure`] instead and never surfaces here.
#[derive(Debug, Error)]
pub enum Error {
    #[error("staging root does not exist: {}", .0.display())]
    StagingRootMissing(PathBuf),

    #[error("staging root is not a directory: {}", .0.display())]
    StagingRootNotDir(PathBuf),

    #[error("cannot create archive root {}: {source}", .path.display())]
    ArchiveRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot resolve {}: {source}", .path.display())]
    ResolveRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "staging root {} and archive root {} overlap",
        .staging.display(),
        .archive.display()
    )]
    OverlappingRoots { staging: PathBuf, archive: PathBuf },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("cannot read config file {}: {source}", .path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config file {}: {source}", .path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to spawn worker thread: {0}")]
    WorkerSpawn(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
