//! V4L2 capture backend for local devices.
//!
//! Requests packed RGB at the preferred size and frame rate, falling back to
//! whatever the driver picks as long as it is RGB3 or YUYV. Reads are bounded
//! by the stream timeout; a timeout counts as a dropped frame.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;
use std::io::ErrorKind;
use std::time::Duration;

use super::normalize::{normalize_to_rgb, PixelFormat};
use super::{ReadError, SourceSettings, SourceStats};
use crate::frame::Frame;

pub(crate) struct V4l2Capture {
    index: u32,
    target_fps: u32,
    width: u32,
    height: u32,
    stride: usize,
    timeout: Duration,
    format: PixelFormat,
    state: Option<V4l2State>,
    frame_count: u64,
}

#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Capture {
    pub(crate) fn new(index: u32, settings: &SourceSettings) -> Self {
        Self {
            index,
            target_fps: settings.target_fps,
            width: settings.width,
            height: settings.height,
            stride: 0,
            timeout: settings.read_timeout(),
            format: PixelFormat::Rgb24,
            state: None,
            frame_count: 0,
        }
    }

    pub(crate) fn label(&self) -> String {
        format!("/dev/video{}", self.index)
    }

    pub(crate) fn connect(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::new(self.index as usize)
            .with_context(|| format!("open v4l2 device {}", self.label()))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.width;
        format.height = self.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Capture: failed to set format on {}: {}",
                    self.label(),
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };
        self.format = PixelFormat::from_fourcc(&format.fourcc.repr).ok_or_else(|| {
            anyhow!(
                "unsupported pixel format {} on {}",
                format.fourcc,
                self.label()
            )
        })?;

        if self.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "V4l2Capture: failed to set fps on {}: {}",
                    self.label(),
                    err
                );
            }
        }

        self.width = format.width;
        self.height = format.height;
        self.stride = format.stride as usize;

        let timeout = self.timeout;
        let state = V4l2StateBuilder {
            device,
            stream_builder: |device| {
                let mut stream =
                    v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                        .map_err(|err| {
                            anyhow::Error::new(err).context("create v4l2 buffer stream")
                        })?;
                stream.set_timeout(timeout);
                Ok::<_, anyhow::Error>(stream)
            },
        }
        .try_build()?;
        self.state = Some(state);

        log::info!(
            "V4l2Capture: connected to {} ({}x{} {:?})",
            self.label(),
            self.width,
            self.height,
            self.format
        );
        Ok(())
    }

    pub(crate) fn read_next(&mut self) -> Result<Frame, ReadError> {
        use v4l::io::traits::CaptureStream;

        let (width, height, stride, format) = (self.width, self.height, self.stride, self.format);
        let state = self
            .state
            .as_mut()
            .ok_or_else(|| ReadError::Fatal("v4l2 device not connected".to_string()))?;

        let pixels = state.with_mut(|fields| match fields.stream.next() {
            Ok((buf, _meta)) => normalize_to_rgb(buf, width, height, stride, format)
                .map_err(|err| ReadError::Transient(err.to_string())),
            Err(err) if matches!(err.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                Err(ReadError::Transient(format!("capture timed out: {}", err)))
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => {
                Err(ReadError::Transient(err.to_string()))
            }
            Err(err) => Err(ReadError::Fatal(format!("capture v4l2 frame: {}", err))),
        })?;

        self.frame_count += 1;
        Frame::from_rgb(pixels, width, height).map_err(|err| ReadError::Transient(err.to_string()))
    }

    pub(crate) fn close(&mut self) {
        // Dropping the stream unmaps the buffers and stops streaming.
        if self.state.take().is_some() {
            log::info!("V4l2Capture: closed {}", self.label());
        }
    }

    pub(crate) fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            label: self.label(),
        }
    }
}
