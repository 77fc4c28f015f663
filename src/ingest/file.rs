//! Local file frame source.
//!
//! This module provides `FileSource` for reading frames from local video files.
//! The file source is responsible for:
//! - Reading frames from a local video file (no network access)
//! - Decoding video frames in-memory
//! - Reporting end-of-stream once the file is exhausted
//!
//! `stub://name` paths produce a finite synthetic clip of
//! `SourceSettings::synthetic_clip_frames` frames.

use std::path::Path;

#[cfg(feature = "ingest-file-ffmpeg")]
use super::file_ffmpeg::FfmpegFileSource;
use super::synthetic::{SyntheticOptions, SyntheticSource};
use super::{FrameSource, OpenError, ReadError, SourceSettings, SourceStats, SYNTHETIC_SCHEME};
use crate::frame::Frame;

/// Local file frame source.
pub struct FileSource {
    backend: FileBackend,
}

enum FileBackend {
    Synthetic(SyntheticSource),
    #[cfg(feature = "ingest-file-ffmpeg")]
    Ffmpeg(FfmpegFileSource),
}

impl FileSource {
    pub fn open(path: &Path, settings: &SourceSettings) -> Result<Self, OpenError> {
        let raw = path.to_string_lossy();
        if !is_local_file_path(&raw) {
            return Err(OpenError::Unavailable(format!(
                "file sources only support local paths, got '{}'",
                raw
            )));
        }
        if raw.starts_with(SYNTHETIC_SCHEME) {
            let (name, options) =
                SyntheticOptions::parse(&raw, Some(settings.synthetic_clip_frames))
                    .map_err(|err| OpenError::Unavailable(err.to_string()))?;
            return Ok(Self {
                backend: FileBackend::Synthetic(SyntheticSource::new(
                    name,
                    settings.width,
                    settings.height,
                    settings.target_fps,
                    options,
                )),
            });
        }

        #[cfg(feature = "ingest-file-ffmpeg")]
        {
            let mut source = FfmpegFileSource::new(path)
                .map_err(|err| OpenError::Unavailable(format!("{:#}", err)))?;
            source.connect();
            Ok(Self {
                backend: FileBackend::Ffmpeg(source),
            })
        }
        #[cfg(not(feature = "ingest-file-ffmpeg"))]
        {
            if !path.is_file() {
                return Err(OpenError::Unavailable(format!(
                    "no such file: {}",
                    path.display()
                )));
            }
            Err(OpenError::Unavailable(format!(
                "{} requires the ingest-file-ffmpeg feature",
                path.display()
            )))
        }
    }
}

impl FrameSource for FileSource {
    fn label(&self) -> String {
        match &self.backend {
            FileBackend::Synthetic(source) => source.label(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.label(),
        }
    }

    fn read_next(&mut self) -> Result<Frame, ReadError> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => source.read_next(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.read_next(),
        }
    }

    fn close(&mut self) {
        match &mut self.backend {
            FileBackend::Synthetic(source) => source.close(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.close(),
        }
    }

    fn stats(&self) -> SourceStats {
        match &self.backend {
            FileBackend::Synthetic(source) => source.stats(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.stats(),
        }
    }
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    if path.starts_with(SYNTHETIC_SCHEME) {
        return true;
    }
    !path.contains("://")
}
