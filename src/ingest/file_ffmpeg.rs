//! Local file decoding using FFmpeg.
//!
//! Decodes the best video stream to RGB24 one frame per read. When the
//! container runs out of packets the decoder is flushed, and once the last
//! buffered frame is out the source reports end-of-stream.

use anyhow::{Context, Result};
use ffmpeg_next as ffmpeg;
use std::path::Path;

use super::{ReadError, SourceStats};
use crate::frame::Frame;

pub(crate) struct FfmpegFileSource {
    path: String,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    flushed: bool,
    frame_count: u64,
}

impl FfmpegFileSource {
    pub(crate) fn new(path: &Path) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&path)
            .with_context(|| format!("failed to open '{}' with ffmpeg", path.display()))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow::anyhow!("file has no video track"))?;
        let stream_index = input_stream.index();
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        Ok(Self {
            path: path.display().to_string(),
            input,
            stream_index,
            decoder,
            scaler,
            flushed: false,
            frame_count: 0,
        })
    }

    pub(crate) fn connect(&mut self) {
        log::info!(
            "FileSource: opened {} ({}x{})",
            self.path,
            self.decoder.width(),
            self.decoder.height()
        );
    }

    pub(crate) fn label(&self) -> String {
        self.path.clone()
    }

    pub(crate) fn read_next(&mut self) -> Result<Frame, ReadError> {
        loop {
            if let Some(frame) = self.receive()? {
                return Ok(frame);
            }
            if self.flushed {
                return Err(ReadError::EndOfStream);
            }

            let stream_index = self.stream_index;
            let packet = self
                .input
                .packets()
                .find(|(stream, _)| stream.index() == stream_index)
                .map(|(_, packet)| packet);

            match packet {
                Some(packet) => {
                    if let Err(err) = self.decoder.send_packet(&packet) {
                        return Err(ReadError::Transient(format!(
                            "decode packet from {}: {}",
                            self.path, err
                        )));
                    }
                }
                None => {
                    self.decoder
                        .send_eof()
                        .map_err(|err| ReadError::Fatal(format!("flush decoder: {}", err)))?;
                    self.flushed = true;
                }
            }
        }
    }

    pub(crate) fn close(&mut self) {
        log::info!(
            "FileSource: closed {} after {} frames",
            self.path,
            self.frame_count
        );
    }

    pub(crate) fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            label: self.path.clone(),
        }
    }

    fn receive(&mut self) -> Result<Option<Frame>, ReadError> {
        let mut decoded = ffmpeg::frame::Video::empty();
        if self.decoder.receive_frame(&mut decoded).is_err() {
            return Ok(None);
        }

        let mut rgb_frame = ffmpeg::frame::Video::empty();
        self.scaler
            .run(&decoded, &mut rgb_frame)
            .map_err(|err| ReadError::Transient(format!("scale frame to RGB: {}", err)))?;
        let (pixels, width, height) =
            frame_to_pixels(&rgb_frame).map_err(|err| ReadError::Transient(format!("{:#}", err)))?;

        self.frame_count += 1;
        Frame::from_rgb(pixels, width, height)
            .map(Some)
            .map_err(|err| ReadError::Transient(err.to_string()))
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}
