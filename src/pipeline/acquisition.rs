//! Acquisition loop.
//!
//! Runs on the pipeline's dedicated thread. While a source is open it
//! alternates between draining pending commands and one capture cycle:
//! read, mask with the current ROI snapshot, publish. While idle it blocks on
//! the command queue. Pacing waits on the command queue too, so a command is
//! never delayed by the rate cap, only by a read already in progress.

use std::sync::atomic::Ordering;
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::channel::{EventSender, PipelineEvent};
use super::{Command, FailureReason, PipelineConfig, PipelineState, StatsCounters, StatusCell};
use crate::ingest::{OpenError, OpenSource, ReadError, SourceDescriptor, SourceOpener};
use crate::roi::{self, SharedRoi};

pub(crate) struct AcquisitionLoop {
    opener: Arc<dyn SourceOpener>,
    commands: Receiver<Command>,
    events: EventSender,
    roi: SharedRoi,
    status: StatusCell,
    stats: Arc<StatsCounters>,
    frame_interval: Option<Duration>,
    max_consecutive_transient: u32,
    source: Option<OpenSource>,
    pending: Option<Command>,
    sequence: u64,
    consecutive_transient: u32,
}

#[derive(PartialEq, Eq)]
enum Flow {
    Continue,
    Exit,
}

impl AcquisitionLoop {
    pub(crate) fn new(
        opener: Arc<dyn SourceOpener>,
        commands: Receiver<Command>,
        events: EventSender,
        roi: SharedRoi,
        status: StatusCell,
        stats: Arc<StatsCounters>,
        config: &PipelineConfig,
    ) -> Self {
        let frame_interval = (config.max_fps > 0).then(|| Duration::from_secs(1) / config.max_fps);
        status.set_state(PipelineState::Idle);
        Self {
            opener,
            commands,
            events,
            roi,
            status,
            stats,
            frame_interval,
            max_consecutive_transient: config.max_consecutive_transient,
            source: None,
            pending: None,
            sequence: 0,
            consecutive_transient: 0,
        }
    }

    pub(crate) fn run(mut self) {
        log::debug!("acquisition loop started");
        loop {
            let command = match self.pending.take() {
                Some(command) => Some(command),
                None if self.source.is_some() => match self.commands.try_recv() {
                    Ok(command) => Some(command),
                    Err(TryRecvError::Empty) => None,
                    Err(TryRecvError::Disconnected) => Some(Command::Shutdown),
                },
                None => Some(self.commands.recv().unwrap_or(Command::Shutdown)),
            };

            match command {
                Some(command) => {
                    if self.handle(command) == Flow::Exit {
                        break;
                    }
                }
                None => self.cycle(),
            }
        }
        log::debug!("acquisition loop exited");
    }

    fn handle(&mut self, command: Command) -> Flow {
        match command {
            Command::Start(descriptor) => {
                if self.source.is_some() {
                    log::info!("start while running; switching to {}", descriptor);
                }
                self.start(descriptor);
            }
            Command::Switch(descriptor) => {
                if self.source.is_none() {
                    log::info!("switch with no open source; starting {}", descriptor);
                }
                self.start(descriptor);
            }
            Command::Stop => self.stop(),
            Command::Shutdown => {
                self.stop();
                return Flow::Exit;
            }
        }
        Flow::Continue
    }

    fn start(&mut self, descriptor: SourceDescriptor) {
        if self.source.is_some() {
            self.close_source(true);
        }

        self.transition(PipelineState::Starting);
        match OpenSource::open(self.opener.as_ref(), &descriptor) {
            Ok(source) => {
                self.source = Some(source);
                self.status.set_active(Some(descriptor.clone()));
                self.sequence = 0;
                self.consecutive_transient = 0;
                self.stats.sessions_opened.fetch_add(1, Ordering::Relaxed);
                log::info!("opened source {}", descriptor);
                self.transition(PipelineState::Running);
            }
            Err(OpenError::Unavailable(reason)) => {
                log::warn!("failed to open source {}: {}", descriptor, reason);
                self.fail(FailureReason::Unavailable(reason));
            }
        }
    }

    fn stop(&mut self) {
        if self.source.is_some() {
            self.close_source(true);
            self.transition(PipelineState::Idle);
        } else if matches!(self.status.state(), PipelineState::Failed(_)) {
            self.transition(PipelineState::Idle);
        }
    }

    /// Running -> Stopping, close the handle. The caller picks the next state.
    fn close_source(&mut self, discard_frames: bool) {
        self.transition(PipelineState::Stopping);
        if discard_frames {
            let discarded = self.events.discard_frames();
            if discarded > 0 {
                log::debug!("discarded {} undelivered frames", discarded);
                self.stats
                    .frames_dropped
                    .fetch_add(discarded as u64, Ordering::Relaxed);
            }
        }
        if let Some(mut source) = self.source.take() {
            if let Some(stats) = source.stats() {
                log::info!(
                    "closing source {} ({} frames captured)",
                    stats.label,
                    stats.frames_captured
                );
            }
            source.close();
        }
        self.status.set_active(None);
    }

    fn fail(&mut self, reason: FailureReason) {
        // Frames already captured stay deliverable ahead of the failure.
        if let Some(mut source) = self.source.take() {
            source.close();
            self.status.set_active(None);
        }
        self.transition(PipelineState::Failed(reason.clone()));
        self.events.publish(PipelineEvent::Error(reason));
    }

    fn transition(&mut self, next: PipelineState) {
        let previous = self.status.state();
        if previous == next {
            return;
        }
        log::info!("pipeline {} -> {}", previous, next);
        self.status.set_state(next.clone());
        self.events.publish(PipelineEvent::StateChanged(next));
    }

    fn cycle(&mut self) {
        let started = Instant::now();
        let Some(source) = self.source.as_mut() else {
            return;
        };

        match source.read_next() {
            Ok(frame) => {
                self.consecutive_transient = 0;
                self.stats.frames_captured.fetch_add(1, Ordering::Relaxed);
                self.sequence += 1;

                let roi = self.roi.snapshot();
                let frame = roi::apply(frame, &roi)
                    .with_sequence(self.sequence)
                    .with_roi(roi);
                if self.events.publish_frame(frame) {
                    self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                    log::trace!("consumer behind; replaced unread frame");
                }
                self.stats.frames_published.fetch_add(1, Ordering::Relaxed);
                self.pace(started);
            }
            Err(ReadError::Transient(reason)) => {
                self.stats.transient_errors.fetch_add(1, Ordering::Relaxed);
                self.consecutive_transient += 1;
                log::debug!(
                    "transient read failure ({} in a row): {}",
                    self.consecutive_transient,
                    reason
                );
                if self.max_consecutive_transient > 0
                    && self.consecutive_transient >= self.max_consecutive_transient
                {
                    log::warn!(
                        "{} consecutive transient failures; treating source as disconnected",
                        self.consecutive_transient
                    );
                    self.fail(FailureReason::Disconnected(format!(
                        "{} consecutive read failures, last: {}",
                        self.consecutive_transient, reason
                    )));
                }
            }
            Err(ReadError::EndOfStream) => {
                log::info!("end of stream after {} frames", self.sequence);
                self.events.publish(PipelineEvent::StreamEnded);
                self.close_source(false);
                self.transition(PipelineState::Idle);
            }
            Err(ReadError::Fatal(reason)) => {
                log::warn!("source failed: {}", reason);
                self.fail(FailureReason::Disconnected(reason));
            }
        }
    }

    /// Wait out the rest of the frame interval, waking early for a command.
    fn pace(&mut self, cycle_started: Instant) {
        let Some(interval) = self.frame_interval else {
            return;
        };
        let Some(remaining) = interval.checked_sub(cycle_started.elapsed()) else {
            return;
        };
        match self.commands.recv_timeout(remaining) {
            Ok(command) => self.pending = Some(command),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => self.pending = Some(Command::Shutdown),
        }
    }
}
