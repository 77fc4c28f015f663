//! Plate capture core
//!
//! Frame acquisition for a number-plate recognition front end: one worker
//! thread pulls frames from a video source, blacks out everything outside an
//! optional region of interest and hands frames to a single consumer through
//! a most-recent-wins channel. Start, stop and source switches are commands;
//! the consumer never blocks on the source.
//!
//! # Module Structure
//!
//! - `ingest`: Frame sources (capture devices, network streams, local files, synthetic)
//! - `roi`: Region-of-interest polygon and mask
//! - `pipeline`: Acquisition loop, state machine and delivery channel
//! - `detect`: Plate candidate detectors (stub)
//! - `config`: File and environment configuration
//! - `ui`: Terminal status display

pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod roi;
pub mod ui;

pub use config::CaptureConfig;
pub use detect::{CandidateDetector, DetectorRegistry, PlateCandidate, StubDetector};
pub use frame::Frame;
pub use ingest::{
    FrameSource, OpenError, OpenSource, ReadError, SourceDescriptor, SourceOpener,
    SourceSettings, SystemOpener,
};
pub use pipeline::{
    CapturePipeline, EventReceiver, FailureReason, PipelineConfig, PipelineEvent, PipelineState,
    PipelineStats,
};
pub use roi::{Point, RegionOfInterest};
