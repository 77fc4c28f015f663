//! Frame container.
//!
//! - `Frame`: immutable RGB24 pixel buffer with dimensions and capture time.
//!
//! Frames are produced by an ingest source, optionally rewritten by the ROI
//! mask and then moved through the delivery channel to the consumer. Nothing
//! in the pipeline keeps a frame after it has been handed on.

use anyhow::{anyhow, Result};
use std::fmt;
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use crate::roi::RegionOfInterest;

/// Bytes per pixel for the only layout frames carry (packed RGB).
pub const BYTES_PER_PIXEL: usize = 3;

/// Immutable RGB24 frame.
///
/// There is no mutable access to the pixel data; the ROI mask builds a new
/// frame instead of editing one in place. `Clone` is the consumer's explicit
/// copy when it needs to keep a frame past one delivery cycle.
#[derive(Clone)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    captured_at: Instant,
    captured_wall: SystemTime,
    sequence: u64,
    roi: Option<Arc<RegionOfInterest>>,
}

impl Frame {
    /// Build a frame from packed RGB24 pixels, stamped with the current time.
    pub fn from_rgb(data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = expected_len(width, height)?;
        if data.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            captured_at: Instant::now(),
            captured_wall: SystemTime::now(),
            sequence: 0,
            roi: None,
        })
    }

    /// Build a frame filled with a single colour.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Result<Self> {
        let len = expected_len(width, height)?;
        let data = rgb.iter().copied().cycle().take(len).collect();
        Self::from_rgb(data, width, height)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Packed RGB24 pixels, row-major.
    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    /// RGB value at `(x, y)`, or `None` outside the frame.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * BYTES_PER_PIXEL;
        Some([
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
        ])
    }

    /// Monotonic acquisition instant.
    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    /// Wall-clock acquisition time (for display and candidate records).
    pub fn captured_wall(&self) -> SystemTime {
        self.captured_wall
    }

    /// Position of this frame within its capture session, starting at 1.
    ///
    /// Zero until the acquisition loop has published the frame.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// ROI snapshot the acquisition loop masked this frame with.
    pub fn roi(&self) -> Option<&Arc<RegionOfInterest>> {
        self.roi.as_ref()
    }

    pub(crate) fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    pub(crate) fn with_roi(mut self, roi: Arc<RegionOfInterest>) -> Self {
        self.roi = Some(roi);
        self
    }

    /// Derive a frame with new pixels but the same dimensions and timestamps.
    pub(crate) fn with_pixels(&self, data: Vec<u8>) -> Self {
        debug_assert_eq!(data.len(), self.data.len());
        Self {
            data,
            width: self.width,
            height: self.height,
            captured_at: self.captured_at,
            captured_wall: self.captured_wall,
            sequence: self.sequence,
            roi: self.roi.clone(),
        }
    }
}

// Pixel data is omitted.
impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .field("captured_at", &self.captured_at)
            .finish()
    }
}

pub(crate) fn expected_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(BYTES_PER_PIXEL))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}
