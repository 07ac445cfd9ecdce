use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::info;

use ringdrain::{DrainConfig, DrainEngine, ShutdownSignal};

#[derive(Parser, Debug)]
#[command(name = "ringdrain")]
#[command(about = "Move closed segments from a ring-buffer directory to persistent storage")]
struct Cli {
    /// Ring-buffer (staging) directory
    #[arg(default_value = "/ram/ringbuffer")]
    staging: PathBuf,

    /// Persistent data directory
    #[arg(default_value = "/data0/persistent")]
    archive: PathBuf,

    /// JSON config file; positional roots are ignored when given
    #[arg(long)]
    config: Option<PathBuf>,

    /// Newest segments of the newest leaf directory left in place
    #[arg(long)]
    retention: Option<usize>,

    /// Extension of data segments inside leaf directories
    #[arg(long)]
    segment_ext: Option<String>,

    /// Extension of channel metadata files
    #[arg(long)]
    metadata_ext: Option<String>,

    /// Pause between cycles in milliseconds
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Worker threads (default: available parallelism)
    #[arg(long)]
    workers: Option<usize>,

    /// Run a single cycle and exit
    #[arg(long)]
    once: bool,
}

impl Cli {
    fn into_config(self) -> Result<DrainConfig> {
        let mut config = match &self.config {
            Some(path) => DrainConfig::from_json_file(path)?,
            None => DrainConfig::new(self.staging, self.archive),
        };
        if let Some(window) = self.retention {
            config.retention_window = window;
        }
        if let Some(ext) = self.segment_ext {
            config.segment_extension = ext;
        }
        if let Some(ext) = self.metadata_ext {
            config.metadata_extension = ext;
        }
        if let Some(ms) = self.interval_ms {
            config.cycle_interval = Duration::from_millis(ms);
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        Ok(config)
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let once = cli.once;
    let config = cli.into_config()?;

    // installed before any worker exists so no signal can kill a copy midway
    let shutdown = ShutdownSignal::new();
    shutdown
        .install()
        .context("failed to install signal handlers")?;

    let mut engine = DrainEngine::start(config).context("failed to start drain engine")?;

    if once {
        let report = engine.run_cycle_with(&shutdown);
        engine.shutdown();
        if report.has_failures() {
            bail!("{} channel(s) failed: {}", report.failures.len(), report.summary());
        }
        return Ok(());
    }

    engine.run(&shutdown);
    engine.shutdown();
    info!("drain engine stopped");
    Ok(())
}
