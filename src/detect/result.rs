use serde::Serialize;
use std::time::SystemTime;

/// Pixel-space box, clamped to the frame it was found in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    /// True when the box lies entirely inside a `width` x `height` frame.
    pub fn fits(&self, width: u32, height: u32) -> bool {
        self.x.saturating_add(self.width) <= width && self.y.saturating_add(self.height) <= height
    }
}

/// One candidate plate read.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PlateCandidate {
    /// Recognised text; empty when a plate was located but not read.
    pub text: String,
    /// In `[0.0, 1.0]`.
    pub confidence: f32,
    pub bbox: BoundingBox,
    pub detected_at: SystemTime,
}
