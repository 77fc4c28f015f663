//! Synthetic frame source.
//!
//! Generates a moving gradient so the rest of the pipeline can run without a
//! camera. Addressed as `stub://name`, with optional query parameters:
//!
//! - `frames=N`: end the stream after N frames
//! - `fail_every=K`: every K-th read is a transient failure
//!
//! The source sleeps between reads to emulate a device's natural frame rate.

use anyhow::{anyhow, Result};
use std::time::{Duration, Instant};

use super::{FrameSource, ReadError, SourceStats, SYNTHETIC_SCHEME};
use crate::frame::Frame;

/// Behaviour knobs for a synthetic source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyntheticOptions {
    /// Total frames before end-of-stream; `None` never ends.
    pub frames: Option<u64>,
    /// Make every K-th read fail transiently.
    pub fail_every: Option<u64>,
}

impl SyntheticOptions {
    /// Split a `stub://name?key=value&...` URI into its name and options.
    ///
    /// `default_frames` applies when the URI does not set `frames`.
    pub fn parse(uri: &str, default_frames: Option<u64>) -> Result<(String, Self)> {
        let rest = uri
            .strip_prefix(SYNTHETIC_SCHEME)
            .ok_or_else(|| anyhow!("synthetic source must start with {}", SYNTHETIC_SCHEME))?;
        let (name, query) = match rest.split_once('?') {
            Some((name, query)) => (name, Some(query)),
            None => (rest, None),
        };
        if name.is_empty() {
            return Err(anyhow!("synthetic source needs a name: {}", uri));
        }

        let mut options = Self {
            frames: default_frames,
            fail_every: None,
        };
        for pair in query.into_iter().flat_map(|q| q.split('&')) {
            if pair.is_empty() {
                continue;
            }
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("malformed synthetic option '{}'", pair))?;
            let value: u64 = value
                .parse()
                .map_err(|_| anyhow!("synthetic option '{}' must be an integer", key))?;
            match key {
                "frames" => options.frames = Some(value),
                "fail_every" if value == 0 => {
                    return Err(anyhow!("fail_every must be greater than zero"))
                }
                "fail_every" => options.fail_every = Some(value),
                other => return Err(anyhow!("unknown synthetic option '{}'", other)),
            }
        }
        Ok((name.to_string(), options))
    }
}

/// Generated frames at a fixed size.
pub struct SyntheticSource {
    label: String,
    width: u32,
    height: u32,
    interval: Option<Duration>,
    options: SyntheticOptions,
    reads: u64,
    frame_count: u64,
    next_due: Option<Instant>,
}

impl SyntheticSource {
    pub fn new(
        label: impl Into<String>,
        width: u32,
        height: u32,
        target_fps: u32,
        options: SyntheticOptions,
    ) -> Self {
        let interval = (target_fps > 0).then(|| Duration::from_secs(1) / target_fps);
        let label = label.into();
        log::info!(
            "SyntheticSource: connected to {} ({}x{}, frames={:?})",
            label,
            width,
            height,
            options.frames
        );
        Self {
            label,
            width,
            height,
            interval,
            options,
            reads: 0,
            frame_count: 0,
            next_due: None,
        }
    }

    fn pace(&mut self) {
        let Some(interval) = self.interval else {
            return;
        };
        let now = Instant::now();
        if let Some(due) = self.next_due {
            if due > now {
                std::thread::sleep(due - now);
            }
        }
        self.next_due = Some(Instant::now() + interval);
    }

    /// Diagonal gradient that drifts one step per frame.
    fn generate_pixels(&self) -> Vec<u8> {
        let w = self.width as u64;
        let h = self.height as u64;
        let mut pixels = Vec::with_capacity((w * h * 3) as usize);
        for y in 0..h {
            for x in 0..w {
                let base = x + y + self.frame_count;
                pixels.push((base % 256) as u8);
                pixels.push(((base / 2) % 256) as u8);
                pixels.push(((x * 255) / w.max(1)) as u8);
            }
        }
        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn read_next(&mut self) -> Result<Frame, ReadError> {
        if self
            .options
            .frames
            .is_some_and(|limit| self.frame_count >= limit)
        {
            return Err(ReadError::EndOfStream);
        }

        self.pace();
        self.reads += 1;
        if self
            .options
            .fail_every
            .is_some_and(|k| self.reads % k == 0)
        {
            return Err(ReadError::Transient(format!(
                "synthetic drop at read {}",
                self.reads
            )));
        }

        let pixels = self.generate_pixels();
        self.frame_count += 1;
        Frame::from_rgb(pixels, self.width, self.height)
            .map_err(|err| ReadError::Fatal(err.to_string()))
    }

    fn close(&mut self) {
        log::info!(
            "SyntheticSource: closed {} after {} frames",
            self.label,
            self.frame_count
        );
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            label: self.label.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_name_and_options() -> Result<()> {
        let (name, options) = SyntheticOptions::parse("stub://gate?frames=12&fail_every=3", None)?;
        assert_eq!(name, "gate");
        assert_eq!(options.frames, Some(12));
        assert_eq!(options.fail_every, Some(3));

        let (_, options) = SyntheticOptions::parse("stub://gate", Some(40))?;
        assert_eq!(options.frames, Some(40));
        Ok(())
    }

    #[test]
    fn rejects_bad_options() {
        assert!(SyntheticOptions::parse("stub://", None).is_err());
        assert!(SyntheticOptions::parse("stub://a?frames=x", None).is_err());
        assert!(SyntheticOptions::parse("stub://a?fail_every=0", None).is_err());
        assert!(SyntheticOptions::parse("stub://a?color=red", None).is_err());
        assert!(SyntheticOptions::parse("rtsp://a", None).is_err());
    }

    #[test]
    fn finite_source_ends_after_limit() {
        let options = SyntheticOptions {
            frames: Some(2),
            fail_every: None,
        };
        let mut source = SyntheticSource::new("clip", 8, 4, 0, options);

        assert!(source.read_next().is_ok());
        assert!(source.read_next().is_ok());
        assert_eq!(source.read_next().unwrap_err(), ReadError::EndOfStream);
        assert_eq!(source.stats().frames_captured, 2);
    }

    #[test]
    fn fail_every_drops_reads_but_keeps_counting_frames() {
        let options = SyntheticOptions {
            frames: None,
            fail_every: Some(3),
        };
        let mut source = SyntheticSource::new("flaky", 4, 4, 0, options);

        let results: Vec<_> = (0..6).map(|_| source.read_next().is_ok()).collect();
        assert_eq!(results, vec![true, true, false, true, true, false]);
        assert_eq!(source.stats().frames_captured, 4);
    }

    #[test]
    fn consecutive_frames_differ() {
        let mut source = SyntheticSource::new("cam", 8, 8, 0, SyntheticOptions::default());
        let a = source.read_next().unwrap();
        let b = source.read_next().unwrap();
        assert_ne!(a.pixels(), b.pixels());
    }
}
