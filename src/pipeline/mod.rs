//! Acquisition pipeline.
//!
//! - `CapturePipeline`: consumer-side handle. Sends commands, updates the ROI,
//!   probes devices, reads state and counters.
//! - `AcquisitionLoop`: runs on its own thread, owns the open source, masks
//!   and publishes frames.
//! - `EventReceiver`: consumer end of the delivery channel.
//!
//! State machine: `Idle -> Starting -> Running -> Stopping -> Idle`, with
//! `Failed` reachable from `Starting` (open failed) and `Running` (source
//! died). A new start while `Running` closes the current source before the
//! next one is opened, so at most one source is ever open.

mod acquisition;
pub mod channel;

use anyhow::{anyhow, Context, Result};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use thiserror::Error;

use crate::ingest::{probe_devices, FrameSource, OpenError, SourceDescriptor, SourceOpener};
use crate::roi::{Point, RegionOfInterest, SharedRoi};

use acquisition::AcquisitionLoop;
pub use channel::{EventReceiver, PipelineEvent};

/// Why the pipeline entered `Failed`.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FailureReason {
    #[error("source unavailable: {0}")]
    Unavailable(String),
    #[error("source disconnected: {0}")]
    Disconnected(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Starting,
    Running,
    Stopping,
    Failed(FailureReason),
}

impl PipelineState {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Starting => f.write_str("starting"),
            Self::Running => f.write_str("running"),
            Self::Stopping => f.write_str("stopping"),
            Self::Failed(reason) => write!(f, "failed ({})", reason),
        }
    }
}

/// Loop tuning.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Publish cap in frames per second; 0 disables the cap.
    pub max_fps: u32,
    /// Consecutive transient read failures tolerated before the source is
    /// treated as disconnected; 0 never escalates.
    pub max_consecutive_transient: u32,
    /// Highest device index `list_available_devices` probes.
    pub probe_max_index: u32,
    /// ROI in effect before the consumer sets one.
    pub initial_roi: RegionOfInterest,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_fps: 30,
            max_consecutive_transient: 50,
            probe_max_index: 9,
            initial_roi: RegionOfInterest::disabled(),
        }
    }
}

/// Snapshot of the loop counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Frames returned by the source.
    pub frames_captured: u64,
    /// Frames handed to the delivery channel.
    pub frames_published: u64,
    /// Frames replaced in the slot or discarded on stop before the consumer took them.
    pub frames_dropped: u64,
    /// Reads that failed transiently.
    pub transient_errors: u64,
    /// Sources successfully opened.
    pub sessions_opened: u64,
}

#[derive(Default)]
pub(crate) struct StatsCounters {
    frames_captured: AtomicU64,
    frames_published: AtomicU64,
    frames_dropped: AtomicU64,
    transient_errors: AtomicU64,
    sessions_opened: AtomicU64,
}

impl StatsCounters {
    fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            frames_published: self.frames_published.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            transient_errors: self.transient_errors.load(Ordering::Relaxed),
            sessions_opened: self.sessions_opened.load(Ordering::Relaxed),
        }
    }
}

/// State visible to both sides: current state and the descriptor of the open source.
#[derive(Default)]
pub(crate) struct Status {
    state: Option<PipelineState>,
    active: Option<SourceDescriptor>,
}

#[derive(Clone, Default)]
pub(crate) struct StatusCell(Arc<Mutex<Status>>);

impl StatusCell {
    fn lock(&self) -> MutexGuard<'_, Status> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn state(&self) -> PipelineState {
        self.lock().state.clone().unwrap_or(PipelineState::Idle)
    }

    fn set_state(&self, state: PipelineState) {
        self.lock().state = Some(state);
    }

    fn active(&self) -> Option<SourceDescriptor> {
        self.lock().active.clone()
    }

    fn set_active(&self, active: Option<SourceDescriptor>) {
        self.lock().active = active;
    }
}

pub(crate) enum Command {
    Start(SourceDescriptor),
    Switch(SourceDescriptor),
    Stop,
    Shutdown,
}

/// Consumer-side handle to a running acquisition thread.
///
/// Commands return as soon as they are queued; their effect shows up as
/// `StateChanged` events. Dropping the handle shuts the thread down and
/// closes any open source.
pub struct CapturePipeline {
    commands: Sender<Command>,
    opener: Arc<dyn SourceOpener>,
    roi: SharedRoi,
    status: StatusCell,
    stats: Arc<StatsCounters>,
    probe_max_index: u32,
    join: Option<JoinHandle<()>>,
}

impl CapturePipeline {
    /// Spawn the acquisition thread in `Idle`.
    pub fn spawn(
        opener: Arc<dyn SourceOpener>,
        config: PipelineConfig,
    ) -> Result<(Self, EventReceiver)> {
        let (commands, command_rx) = mpsc::channel();
        let (events, receiver) = channel::delivery_channel();
        let roi = SharedRoi::new(config.initial_roi.clone());
        let status = StatusCell::default();
        let stats = Arc::new(StatsCounters::default());

        let acquisition = AcquisitionLoop::new(
            Arc::clone(&opener),
            command_rx,
            events,
            roi.clone(),
            status.clone(),
            Arc::clone(&stats),
            &config,
        );
        let join = std::thread::Builder::new()
            .name("capture-loop".to_string())
            .spawn(move || acquisition.run())
            .context("spawn acquisition thread")?;

        Ok((
            Self {
                commands,
                opener,
                roi,
                status,
                stats,
                probe_max_index: config.probe_max_index,
                join: Some(join),
            },
            receiver,
        ))
    }

    /// Open `descriptor` and start streaming. Behaves as `switch_source` when running.
    pub fn start(&self, descriptor: SourceDescriptor) -> Result<()> {
        self.send(Command::Start(descriptor))
    }

    /// Close the current source and return to `Idle`.
    pub fn stop(&self) -> Result<()> {
        self.send(Command::Stop)
    }

    /// Close the current source, then open `descriptor`.
    pub fn switch_source(&self, descriptor: SourceDescriptor) -> Result<()> {
        self.send(Command::Switch(descriptor))
    }

    /// Replace the ROI. Takes effect from the next captured frame.
    pub fn update_roi(&self, points: Vec<Point>, enabled: bool) {
        self.roi.replace(RegionOfInterest::new(points, enabled));
    }

    pub fn roi(&self) -> Arc<RegionOfInterest> {
        self.roi.snapshot()
    }

    /// Probe local devices `0..=probe_max_index` on the calling thread.
    ///
    /// The device the pipeline currently has open is reported without being
    /// reopened. Best-effort and potentially slow; not meant for every start.
    pub fn list_available_devices(&self) -> Vec<SourceDescriptor> {
        let active = self.status.active();
        let skip = |descriptor: &SourceDescriptor| active.as_ref() == Some(descriptor);

        let mut found: Vec<SourceDescriptor> = (0..=self.probe_max_index)
            .map(SourceDescriptor::LocalDevice)
            .filter(|d| skip(d))
            .collect();
        let probed = ProbeExcept {
            inner: self.opener.as_ref(),
            skip: active.as_ref(),
        };
        found.extend(probe_devices(&probed, self.probe_max_index));
        found.sort_by_key(|descriptor| match descriptor {
            SourceDescriptor::LocalDevice(index) => *index,
            _ => u32::MAX,
        });
        found
    }

    pub fn state(&self) -> PipelineState {
        self.status.state()
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats.snapshot()
    }

    /// Stop streaming, close the source and join the acquisition thread.
    pub fn shutdown(mut self) -> Result<()> {
        self.join_loop()
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| anyhow!("acquisition thread is not running"))
    }

    fn join_loop(&mut self) -> Result<()> {
        let Some(join) = self.join.take() else {
            return Ok(());
        };
        // The loop may already be gone; joining still reports a panic.
        let _ = self.commands.send(Command::Shutdown);
        join.join()
            .map_err(|_| anyhow!("acquisition thread panicked"))
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        if let Err(err) = self.join_loop() {
            log::error!("capture pipeline shutdown: {}", err);
        }
    }
}

/// Opener wrapper that refuses one descriptor without touching it.
struct ProbeExcept<'a> {
    inner: &'a dyn SourceOpener,
    skip: Option<&'a SourceDescriptor>,
}

impl SourceOpener for ProbeExcept<'_> {
    fn open(&self, descriptor: &SourceDescriptor) -> Result<Box<dyn FrameSource>, OpenError> {
        if self.skip == Some(descriptor) {
            return Err(OpenError::Unavailable("in use by the pipeline".to_string()));
        }
        self.inner.open(descriptor)
    }
}
