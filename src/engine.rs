//! Drain engine: discovers channels and drives a bounded worker pool.
//!
//! Each cycle lists the channel directories under the staging root, hands
//! them to the pool with at most `workers` tasks in flight, waits for every
//! dispatched task, then sleeps for the cycle interval. Channels are
//! rediscovered every cycle, so new ones are picked up and removed ones are
//! dropped without any bookkeeping.
//!
//! Only the dispatch loop looks at the [`ShutdownSignal`]. Once it is set,
//! no further channels are dispatched and the engine waits for in-flight
//! tasks before returning.

use std::ffi::OsString;
use std::path::Path;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::anyhow;
use log::{debug, error, info, trace};

use crate::config::DrainConfig;
use crate::error::{Error, Result};
use crate::migrate::StreamMigrator;
use crate::report::{ChannelFailure, ChannelOutcome, CycleReport};
use crate::scan;
use crate::signal::ShutdownSignal;

const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Where the engine is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Scanning,
    Dispatching,
    AwaitingRound,
    Sleeping,
    ShuttingDown,
}

struct Job {
    channel: OsString,
    reply: Sender<ChannelOutcome>,
}

pub struct DrainEngine {
    config: DrainConfig,
    jobs: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    state: EngineState,
    cycles: u64,
}

impl DrainEngine {
    /// Validate the roots and spin up the worker pool.
    ///
    /// A missing staging root is fatal; a missing archive root is created.
    pub fn start(config: DrainConfig) -> Result<Self> {
        config.validate()?;

        let staging = &config.staging_root;
        if !staging.exists() {
            return Err(Error::StagingRootMissing(staging.clone()));
        }
        if !staging.is_dir() {
            return Err(Error::StagingRootNotDir(staging.clone()));
        }
        std::fs::create_dir_all(&config.archive_root).map_err(|source| Error::ArchiveRoot {
            path: config.archive_root.clone(),
            source,
        })?;
        reject_overlapping_roots(staging, &config.archive_root)?;

        let migrator = Arc::new(StreamMigrator::new(&config));
        let (tx, rx) = mpsc::channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));

        let mut engine = Self {
            config,
            jobs: Some(tx),
            workers: Vec::new(),
            state: EngineState::Idle,
            cycles: 0,
        };
        for worker_id in 0..engine.config.workers {
            let rx = Arc::clone(&rx);
            let migrator = Arc::clone(&migrator);
            let handle = thread::Builder::new()
                .name(format!("drain-worker-{}", worker_id))
                .spawn(move || worker_loop(&rx, &migrator))
                .map_err(Error::WorkerSpawn)?;
            engine.workers.push(handle);
        }

        info!(
            "drain engine started: {} -> {} ({} workers, retention {})",
            engine.config.staging_root.display(),
            engine.config.archive_root.display(),
            engine.config.workers,
            engine.config.retention_window
        );
        Ok(engine)
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn config(&self) -> &DrainConfig {
        &self.config
    }

    /// Number of cycles started so far.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Run exactly one cycle over every channel currently present.
    pub fn run_cycle(&mut self) -> CycleReport {
        self.cycle(None)
    }

    /// Run one cycle, dispatching no further channels once `shutdown` is
    /// requested. Channels already handed to a worker finish their pass.
    pub fn run_cycle_with(&mut self, shutdown: &ShutdownSignal) -> CycleReport {
        self.cycle(Some(shutdown))
    }

    /// Cycle until `shutdown` is requested, then return once the round in
    /// progress has drained.
    pub fn run(&mut self, shutdown: &ShutdownSignal) {
        while !shutdown.is_requested() {
            self.run_cycle_with(shutdown);
            if shutdown.is_requested() {
                break;
            }
            self.state = EngineState::Sleeping;
            sleep_unless_stopped(self.config.cycle_interval, shutdown);
        }
        self.state = EngineState::Idle;
        info!("drain loop stopped after {} cycles", self.cycles);
    }

    /// Close the job queue and join every worker. Idempotent.
    pub fn shutdown(&mut self) {
        self.state = EngineState::ShuttingDown;
        if self.jobs.take().is_none() {
            return;
        }
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("drain worker exited abnormally");
            }
        }
        debug!("worker pool drained");
    }

    fn cycle(&mut self, shutdown: Option<&ShutdownSignal>) -> CycleReport {
        self.cycles += 1;
        let start = Instant::now();
        let mut report = CycleReport::new(self.cycles);

        self.state = EngineState::Scanning;
        let channels = match scan::list_channels(&self.config.staging_root) {
            Ok(channels) => channels,
            Err(err) => {
                error!("cycle {}: cannot list staging root: {:#}", self.cycles, err);
                report.scan_error = Some(format!("{err:#}"));
                return self.finish(report, start);
            }
        };
        report.channels_scanned = channels.len();

        let Some(jobs) = self.jobs.as_ref() else {
            report.channels_skipped = channels.len();
            return self.finish(report, start);
        };

        self.state = EngineState::Dispatching;
        let (reply_tx, reply_rx) = mpsc::channel();
        let mut pending = channels.into_iter();
        let mut in_flight = 0usize;

        loop {
            let stopping = shutdown.is_some_and(ShutdownSignal::is_requested);
            while !stopping && in_flight < self.config.workers {
                let Some(channel) = pending.next() else {
                    break;
                };
                let name = channel.to_string_lossy().into_owned();
                let job = Job {
                    channel,
                    reply: reply_tx.clone(),
                };
                if jobs.send(job).is_err() {
                    report.record(Err(ChannelFailure::new(name, anyhow!("worker pool is closed"))));
                    continue;
                }
                in_flight += 1;
            }

            if in_flight == 0 {
                break;
            }
            self.state = EngineState::AwaitingRound;
            let Ok(outcome) = reply_rx.recv() else {
                break;
            };
            in_flight -= 1;
            if let Err(failure) = &outcome {
                error!("{failure}");
            }
            report.record(outcome);
        }

        report.channels_skipped = pending.count();
        if report.channels_skipped > 0 {
            info!(
                "shutdown requested, {} channels left for a later run",
                report.channels_skipped
            );
        }
        self.finish(report, start)
    }

    fn finish(&mut self, mut report: CycleReport, start: Instant) -> CycleReport {
        report.duration = start.elapsed();
        if report.is_idle() {
            trace!("{}", report.summary());
        } else {
            info!("{}", report.summary());
        }
        if self.state != EngineState::ShuttingDown {
            self.state = EngineState::Idle;
        }
        report
    }
}

impl Drop for DrainEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Staging and archive must be disjoint trees. With a shared root every
/// segment compares equal to itself and would be deleted uncopied; with one
/// nested in the other the inner root is drained into itself.
fn reject_overlapping_roots(staging: &Path, archive: &Path) -> Result<()> {
    let resolve = |path: &Path| {
        path.canonicalize().map_err(|source| Error::ResolveRoot {
            path: path.to_path_buf(),
            source,
        })
    };
    let staging_real = resolve(staging)?;
    let archive_real = resolve(archive)?;
    if staging_real.starts_with(&archive_real) || archive_real.starts_with(&staging_real) {
        return Err(Error::OverlappingRoots {
            staging: staging_real,
            archive: archive_real,
        });
    }
    Ok(())
}

fn worker_loop(jobs: &Mutex<Receiver<Job>>, migrator: &StreamMigrator) {
    loop {
        let next = match jobs.lock() {
            Ok(rx) => rx.recv(),
            Err(poisoned) => poisoned.into_inner().recv(),
        };
        let Ok(job) = next else {
            break;
        };
        let outcome = migrator.run(&job.channel);
        let _ = job.reply.send(outcome);
    }
}

fn sleep_unless_stopped(interval: Duration, shutdown: &ShutdownSignal) {
    let deadline = Instant::now() + interval;
    loop {
        if shutdown.is_requested() {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        thread::sleep((deadline - now).min(SLEEP_SLICE));
    }
}
