//! Frame ingestion sources.
//!
//! This module provides the sources the acquisition loop can open:
//! - Local capture devices by index (feature: ingest-v4l2)
//! - Network streams such as RTSP or HTTP (feature: stream-gstreamer)
//! - Local video files (feature: ingest-file-ffmpeg)
//! - Synthetic `stub://` sources (always available, used by tests and demos)
//!
//! Every source produces RGB24 `Frame` instances through the pull-based
//! [`FrameSource`] trait. A source holds its OS handle from a successful
//! `open` until `close`; the acquisition loop wraps it in [`OpenSource`] so the
//! handle is released on every exit path.
//!
//! Sources are NOT responsible for:
//! - Rate capping for the consumer (the loop does that)
//! - Applying the region of interest
//! - Retaining frames after `read_next` returns them

mod device;
mod file;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;
#[cfg(feature = "ingest-v4l2")]
mod normalize;
mod stream;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub(crate) mod v4l2;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

use crate::frame::Frame;

pub use device::DeviceSource;
pub use file::FileSource;
pub use stream::StreamSource;
pub use synthetic::{SyntheticOptions, SyntheticSource};

/// Scheme for generated sources that need no hardware.
pub const SYNTHETIC_SCHEME: &str = "stub://";

/// Which input the acquisition loop opens next.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SourceDescriptor {
    /// Local capture device by index (`/dev/video{index}` on Linux).
    LocalDevice(u32),
    /// Network stream URI (`rtsp://`, `http://`, `stub://`).
    NetworkStream(String),
    /// Local video file.
    FilePath(PathBuf),
}

impl FromStr for SourceDescriptor {
    type Err = anyhow::Error;

    /// A bare integer is a device index, `file://` or a plain path is a file,
    /// anything else with a scheme is a network stream.
    fn from_str(s: &str) -> anyhow::Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            anyhow::bail!("source must not be empty");
        }
        if let Ok(index) = s.parse::<u32>() {
            return Ok(Self::LocalDevice(index));
        }
        if let Some(path) = s.strip_prefix("file://") {
            return Ok(Self::FilePath(PathBuf::from(path)));
        }
        if s.contains("://") {
            return Ok(Self::NetworkStream(s.to_string()));
        }
        Ok(Self::FilePath(PathBuf::from(s)))
    }
}

impl fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LocalDevice(index) => write!(f, "{}", index),
            Self::NetworkStream(uri) => write!(f, "{}", uri),
            Self::FilePath(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Failure to open a source. Fatal for that start attempt only.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum OpenError {
    #[error("source unavailable: {0}")]
    Unavailable(String),
}

/// Failure to read the next frame.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ReadError {
    /// One dropped or corrupt frame, or a read timeout. Retry next cycle.
    #[error("transient read failure: {0}")]
    Transient(String),
    /// The source is gone (device unplugged, stream torn down).
    #[error("source failed: {0}")]
    Fatal(String),
    /// A finite source has no more frames.
    #[error("end of stream")]
    EndOfStream,
}

/// Frame counters reported by a source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub label: String,
}

/// An open video input.
///
/// `read_next` is the only call allowed to block. Implementations bound it
/// with a timeout where the backend supports one and report the timeout as
/// [`ReadError::Transient`].
pub trait FrameSource: Send {
    /// Human-readable source label for logs.
    fn label(&self) -> String;

    fn read_next(&mut self) -> Result<Frame, ReadError>;

    /// Release the underlying handle. Called exactly once by [`OpenSource`].
    fn close(&mut self);

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: 0,
            label: self.label(),
        }
    }
}

/// Opens sources from descriptors.
pub trait SourceOpener: Send + Sync {
    fn open(&self, descriptor: &SourceDescriptor) -> Result<Box<dyn FrameSource>, OpenError>;
}

/// Scoped ownership of an open source. Closes on drop if not closed earlier.
pub struct OpenSource {
    descriptor: SourceDescriptor,
    source: Option<Box<dyn FrameSource>>,
}

impl OpenSource {
    pub fn open(
        opener: &dyn SourceOpener,
        descriptor: &SourceDescriptor,
    ) -> Result<Self, OpenError> {
        let source = opener.open(descriptor)?;
        Ok(Self {
            descriptor: descriptor.clone(),
            source: Some(source),
        })
    }

    pub fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    pub fn read_next(&mut self) -> Result<Frame, ReadError> {
        match self.source.as_mut() {
            Some(source) => source.read_next(),
            None => Err(ReadError::Fatal("source already closed".to_string())),
        }
    }

    pub fn stats(&self) -> Option<SourceStats> {
        self.source.as_ref().map(|source| source.stats())
    }

    /// Close now. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.close();
            log::debug!("closed source {}", self.descriptor);
        }
    }
}

impl Drop for OpenSource {
    fn drop(&mut self) {
        self.close();
    }
}

/// Capture parameters shared by every source the [`SystemOpener`] creates.
#[derive(Clone, Debug, PartialEq)]
pub struct SourceSettings {
    /// Requested capture rate; synthetic sources pace themselves to it.
    pub target_fps: u32,
    /// Preferred frame width.
    pub width: u32,
    /// Preferred frame height.
    pub height: u32,
    /// Length of a synthetic file clip.
    pub synthetic_clip_frames: u64,
    /// Device indices that open as synthetic cameras.
    pub synthetic_devices: Vec<u32>,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            target_fps: 30,
            width: 1280,
            height: 720,
            synthetic_clip_frames: 300,
            synthetic_devices: Vec::new(),
        }
    }
}

impl SourceSettings {
    /// Upper bound for a single blocking read.
    pub fn read_timeout(&self) -> std::time::Duration {
        let base_ms = if self.target_fps == 0 {
            500
        } else {
            (1000 / self.target_fps).saturating_mul(4)
        };
        std::time::Duration::from_millis(base_ms.max(500) as u64)
    }
}

/// Default opener: dispatches descriptors to the compiled-in backends.
#[derive(Clone, Debug, Default)]
pub struct SystemOpener {
    settings: SourceSettings,
}

impl SystemOpener {
    pub fn new(settings: SourceSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &SourceSettings {
        &self.settings
    }
}

impl SourceOpener for SystemOpener {
    fn open(&self, descriptor: &SourceDescriptor) -> Result<Box<dyn FrameSource>, OpenError> {
        let source: Box<dyn FrameSource> = match descriptor {
            SourceDescriptor::LocalDevice(index) => {
                Box::new(DeviceSource::open(*index, &self.settings)?)
            }
            SourceDescriptor::NetworkStream(uri) => {
                Box::new(StreamSource::open(uri, &self.settings)?)
            }
            SourceDescriptor::FilePath(path) => Box::new(FileSource::open(path, &self.settings)?),
        };
        Ok(source)
    }
}

/// Probe device indices `0..=max_index` and report the ones that open.
///
/// Each successful probe is closed before the next index is tried. This is a
/// brute-force scan: slow on some platforms, and it can miss devices that are
/// busy or report phantom ones on systems without a clean device list.
pub fn probe_devices(opener: &dyn SourceOpener, max_index: u32) -> Vec<SourceDescriptor> {
    let mut found = Vec::new();
    for index in 0..=max_index {
        let descriptor = SourceDescriptor::LocalDevice(index);
        match OpenSource::open(opener, &descriptor) {
            Ok(mut source) => {
                source.close();
                found.push(descriptor);
            }
            Err(err) => {
                log::debug!("device probe {}: {}", index, err);
            }
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn descriptor_parsing() {
        assert_eq!(
            "2".parse::<SourceDescriptor>().unwrap(),
            SourceDescriptor::LocalDevice(2)
        );
        assert_eq!(
            "rtsp://10.0.0.5:554/live".parse::<SourceDescriptor>().unwrap(),
            SourceDescriptor::NetworkStream("rtsp://10.0.0.5:554/live".to_string())
        );
        assert_eq!(
            "file:///tmp/clip.mp4".parse::<SourceDescriptor>().unwrap(),
            SourceDescriptor::FilePath(Path::new("/tmp/clip.mp4").to_path_buf())
        );
        assert_eq!(
            "videos/clip.mp4".parse::<SourceDescriptor>().unwrap(),
            SourceDescriptor::FilePath(Path::new("videos/clip.mp4").to_path_buf())
        );
        assert!("  ".parse::<SourceDescriptor>().is_err());
        assert!(matches!(
            "-1".parse::<SourceDescriptor>().unwrap(),
            SourceDescriptor::FilePath(_)
        ));
    }

    #[test]
    fn descriptor_display_round_trips() {
        for raw in ["0", "rtsp://cam/stream", "clip.mp4"] {
            let parsed: SourceDescriptor = raw.parse().unwrap();
            assert_eq!(parsed.to_string(), raw);
        }
    }

    #[test]
    fn read_timeout_has_floor() {
        let mut settings = SourceSettings::default();
        assert_eq!(settings.read_timeout().as_millis(), 500);
        settings.target_fps = 2;
        assert_eq!(settings.read_timeout().as_millis(), 2000);
        settings.target_fps = 0;
        assert_eq!(settings.read_timeout().as_millis(), 500);
    }

    #[test]
    fn system_opener_probes_synthetic_devices() {
        let opener = SystemOpener::new(SourceSettings {
            width: 16,
            height: 8,
            synthetic_devices: vec![1, 3],
            ..SourceSettings::default()
        });
        let found = probe_devices(&opener, 4);
        assert_eq!(
            found,
            vec![SourceDescriptor::LocalDevice(1), SourceDescriptor::LocalDevice(3)]
        );
    }

    #[test]
    fn open_source_reads_then_rejects_after_close() {
        let opener = SystemOpener::new(SourceSettings {
            target_fps: 0,
            width: 4,
            height: 4,
            ..SourceSettings::default()
        });
        let descriptor = SourceDescriptor::NetworkStream("stub://cam".to_string());
        let mut source = OpenSource::open(&opener, &descriptor).unwrap();

        let frame = source.read_next().unwrap();
        assert_eq!((frame.width(), frame.height()), (4, 4));

        source.close();
        assert!(matches!(source.read_next(), Err(ReadError::Fatal(_))));
    }
}
