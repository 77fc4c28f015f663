//! Network stream source.
//!
//! This module provides `StreamSource` for IP cameras and other network
//! streams (RTSP, HTTP). Real streams are decoded by GStreamer; `stub://` URIs
//! produce synthetic frames.
//!
//! The GStreamer pipeline keeps a single decoded frame in its appsink and
//! drops older ones, so a slow reader always gets the newest picture. Each
//! pull waits at most `SourceSettings::read_timeout()`.

#[cfg(feature = "stream-gstreamer")]
use anyhow::Context;
#[cfg(feature = "stream-gstreamer")]
use std::time::Duration;

use super::synthetic::{SyntheticOptions, SyntheticSource};
use super::{FrameSource, OpenError, ReadError, SourceSettings, SourceStats, SYNTHETIC_SCHEME};
use crate::frame::Frame;

/// Network stream source.
pub struct StreamSource {
    backend: StreamBackend,
}

enum StreamBackend {
    Synthetic(SyntheticSource),
    #[cfg(feature = "stream-gstreamer")]
    Gstreamer(GstreamerStream),
}

impl StreamSource {
    pub fn open(uri: &str, settings: &SourceSettings) -> Result<Self, OpenError> {
        if uri.starts_with(SYNTHETIC_SCHEME) {
            let (name, options) = SyntheticOptions::parse(uri, None)
                .map_err(|err| OpenError::Unavailable(err.to_string()))?;
            return Ok(Self {
                backend: StreamBackend::Synthetic(SyntheticSource::new(
                    name,
                    settings.width,
                    settings.height,
                    settings.target_fps,
                    options,
                )),
            });
        }

        #[cfg(feature = "stream-gstreamer")]
        {
            let mut stream = GstreamerStream::new(uri, settings)
                .map_err(|err| OpenError::Unavailable(format!("{:#}", err)))?;
            stream
                .connect()
                .map_err(|err| OpenError::Unavailable(format!("{:#}", err)))?;
            Ok(Self {
                backend: StreamBackend::Gstreamer(stream),
            })
        }
        #[cfg(not(feature = "stream-gstreamer"))]
        {
            Err(OpenError::Unavailable(format!(
                "{} requires the stream-gstreamer feature",
                uri
            )))
        }
    }
}

impl FrameSource for StreamSource {
    fn label(&self) -> String {
        match &self.backend {
            StreamBackend::Synthetic(source) => source.label(),
            #[cfg(feature = "stream-gstreamer")]
            StreamBackend::Gstreamer(source) => source.uri.clone(),
        }
    }

    fn read_next(&mut self) -> Result<Frame, ReadError> {
        match &mut self.backend {
            StreamBackend::Synthetic(source) => source.read_next(),
            #[cfg(feature = "stream-gstreamer")]
            StreamBackend::Gstreamer(source) => source.read_next(),
        }
    }

    fn close(&mut self) {
        match &mut self.backend {
            StreamBackend::Synthetic(source) => source.close(),
            #[cfg(feature = "stream-gstreamer")]
            StreamBackend::Gstreamer(source) => source.close(),
        }
    }

    fn stats(&self) -> SourceStats {
        match &self.backend {
            StreamBackend::Synthetic(source) => source.stats(),
            #[cfg(feature = "stream-gstreamer")]
            StreamBackend::Gstreamer(source) => SourceStats {
                frames_captured: source.frame_count,
                label: source.uri.clone(),
            },
        }
    }
}

// ----------------------------------------------------------------------------
// GStreamer backend
// ----------------------------------------------------------------------------

#[cfg(feature = "stream-gstreamer")]
const STATE_CHANGE_TIMEOUT_SECS: u64 = 5;

#[cfg(feature = "stream-gstreamer")]
struct GstreamerStream {
    uri: String,
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
    timeout: Duration,
    frame_count: u64,
}

#[cfg(feature = "stream-gstreamer")]
impl GstreamerStream {
    /// Build: uridecodebin ! videoconvert ! RGB appsink (1 buffer, drop old).
    fn new(uri: &str, settings: &SourceSettings) -> anyhow::Result<Self> {
        use gstreamer::prelude::*;

        gstreamer::init().context("initialize gstreamer")?;

        let description = format!(
            "uridecodebin uri={} ! videoconvert ! video/x-raw,format=RGB ! \
             appsink name=appsink sync=false max-buffers=1 drop=true",
            uri
        );
        let pipeline = gstreamer::parse::launch(&description)
            .context("build stream pipeline")?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow::anyhow!("stream pipeline is not a Pipeline"))?;

        let appsink = pipeline
            .by_name("appsink")
            .context("appsink element missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow::anyhow!("appsink element has unexpected type"))?;

        let caps = gstreamer::Caps::builder("video/x-raw")
            .field("format", "RGB")
            .build();
        appsink.set_caps(Some(&caps));
        appsink.set_max_buffers(1);
        appsink.set_drop(true);

        Ok(Self {
            uri: uri.to_string(),
            pipeline,
            appsink,
            timeout: settings.read_timeout(),
            frame_count: 0,
        })
    }

    fn connect(&mut self) -> anyhow::Result<()> {
        use gstreamer::prelude::*;

        if let Err(err) = self.pipeline.set_state(gstreamer::State::Playing) {
            self.reset();
            anyhow::bail!("set stream pipeline {} to Playing: {}", self.uri, err);
        }
        let (result, _, _) = self
            .pipeline
            .state(gstreamer::ClockTime::from_seconds(STATE_CHANGE_TIMEOUT_SECS));
        if let Err(err) = result {
            self.reset();
            anyhow::bail!("stream {} failed to start: {}", self.uri, err);
        }
        if let Some(ReadError::Fatal(reason)) = self.poll_bus() {
            self.reset();
            anyhow::bail!(reason);
        }
        log::info!("StreamSource: connected to {}", self.uri);
        Ok(())
    }

    /// Drop back to `Null` after a failed start.
    fn reset(&self) {
        use gstreamer::prelude::*;

        if let Err(err) = self.pipeline.set_state(gstreamer::State::Null) {
            log::warn!("StreamSource: failed to reset {}: {}", self.uri, err);
        }
    }

    fn read_next(&mut self) -> Result<Frame, ReadError> {
        if let Some(err) = self.poll_bus() {
            return Err(err);
        }

        let timeout = gstreamer::ClockTime::from_mseconds(self.timeout.as_millis() as u64);
        let Some(sample) = self.appsink.try_pull_sample(timeout) else {
            if self.appsink.is_eos() {
                return Err(ReadError::EndOfStream);
            }
            return Err(ReadError::Transient("stream stalled".to_string()));
        };

        let (pixels, width, height) =
            sample_to_pixels(&sample).map_err(|err| ReadError::Transient(format!("{:#}", err)))?;
        self.frame_count += 1;
        Frame::from_rgb(pixels, width, height).map_err(|err| ReadError::Transient(err.to_string()))
    }

    fn close(&mut self) {
        use gstreamer::prelude::*;

        if let Err(err) = self.pipeline.set_state(gstreamer::State::Null) {
            log::warn!("StreamSource: failed to stop {}: {}", self.uri, err);
        }
        log::info!("StreamSource: closed {}", self.uri);
    }

    /// Drain pending bus messages. EOS and errors map to read errors.
    fn poll_bus(&mut self) -> Option<ReadError> {
        use gstreamer::prelude::*;

        let bus = self.pipeline.bus()?;
        while let Some(message) = bus.timed_pop(gstreamer::ClockTime::ZERO) {
            use gstreamer::MessageView;
            match message.view() {
                MessageView::Error(err) => {
                    return Some(ReadError::Fatal(format!(
                        "gstreamer error from {:?}: {}",
                        err.src().map(|s| s.path_string()),
                        err.error()
                    )));
                }
                MessageView::Eos(..) => return Some(ReadError::EndOfStream),
                _ => {}
            }
        }
        None
    }
}

#[cfg(feature = "stream-gstreamer")]
fn sample_to_pixels(sample: &gstreamer::Sample) -> anyhow::Result<(Vec<u8>, u32, u32)> {
    let buffer = sample.buffer().context("stream sample missing buffer")?;
    let caps = sample.caps().context("stream sample missing caps")?;
    let info =
        gstreamer_video::VideoInfo::from_caps(caps).context("parse stream caps as video info")?;

    let width = info.width();
    let height = info.height();
    let row_bytes = (width as usize) * 3;
    let stride = info.stride()[0] as usize;

    let map = buffer.map_readable().context("map stream buffer")?;
    let data = map.as_slice();

    if stride == row_bytes {
        let len = row_bytes * height as usize;
        let pixels = data.get(..len).context("stream buffer is truncated")?;
        return Ok((pixels.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("stream buffer row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}
