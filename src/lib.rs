//! Ring-buffer drain engine.
//!
//! Moves closed data segments from a fast staging filesystem (written by an
//! external recorder) to durable archive storage, one channel per worker,
//! forever. The newest segments of each channel's newest leaf directory are
//! left alone because the recorder may still be writing them.
//!
//! Staging layout, mirrored one-to-one in the archive:
//!
//! ```text
//! <staging_root>/<channel>/<metadata>.h5
//! <staging_root>/<channel>/<leaf dir>/<segment>.h5
//! ```

pub mod compare;
pub mod config;
pub mod engine;
pub mod error;
pub mod fsops;
pub mod migrate;
pub mod report;
pub mod scan;
pub mod signal;

pub use config::DrainConfig;
pub use engine::{DrainEngine, EngineState};
pub use error::{Error, Result};
pub use migrate::StreamMigrator;
pub use report::{ChannelFailure, ChannelOutcome, ChannelReport, CycleReport};
pub use signal::ShutdownSignal;
