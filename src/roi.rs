//! Region-of-interest polygon and frame mask.
//!
//! The consumer draws a polygon in frame coordinates; the acquisition loop
//! blacks out everything outside it before publishing a frame. Containment is
//! decided on integer pixel coordinates with the even-odd crossing rule, and a
//! pixel lying on an edge or vertex counts as inside.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

use crate::frame::{Frame, BYTES_PER_PIXEL};

/// Fill value for masked pixels.
pub const MASK_FILL: [u8; 3] = [0, 0, 0];

/// Polygon vertex in frame pixel coordinates.
///
/// Serialized as a `[x, y]` pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "(i32, i32)", into = "(i32, i32)")]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl From<(i32, i32)> for Point {
    fn from((x, y): (i32, i32)) -> Self {
        Self { x, y }
    }
}

impl From<Point> for (i32, i32) {
    fn from(p: Point) -> Self {
        (p.x, p.y)
    }
}

/// Closed polygon plus an enabled flag.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionOfInterest {
    #[serde(default)]
    pub points: Vec<Point>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Inclusive pixel rectangle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelRect {
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
}

impl PixelRect {
    pub fn width(&self) -> u32 {
        self.max_x - self.min_x + 1
    }

    pub fn height(&self) -> u32 {
        self.max_y - self.min_y + 1
    }
}

impl RegionOfInterest {
    pub fn new(points: Vec<Point>, enabled: bool) -> Self {
        Self { points, enabled }
    }

    /// ROI that masks nothing.
    pub fn disabled() -> Self {
        Self {
            points: Vec::new(),
            enabled: false,
        }
    }

    /// True when the mask would change a frame.
    pub fn is_active(&self) -> bool {
        self.enabled && self.points.len() >= 3
    }

    /// Closed-region containment test.
    pub fn contains(&self, p: Point) -> bool {
        if self.points.len() < 3 {
            return false;
        }
        // Differences of i32 coordinates need 33 bits; their products need i128.
        let px = p.x as i128;
        let py = p.y as i128;
        let n = self.points.len();
        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let (xi, yi) = (self.points[i].x as i128, self.points[i].y as i128);
            let (xj, yj) = (self.points[j].x as i128, self.points[j].y as i128);

            if on_segment(px, py, xi, yi, xj, yj) {
                return true;
            }

            if (yi > py) != (yj > py) {
                // px < xi + (xj - xi) * (py - yi) / (yj - yi), without the division.
                let dy = yj - yi;
                let lhs = (px - xi) * dy;
                let rhs = (xj - xi) * (py - yi);
                let crosses = if dy > 0 { lhs < rhs } else { lhs > rhs };
                if crosses {
                    inside = !inside;
                }
            }
            j = i;
        }
        inside
    }

    /// Polygon bounding box clipped to a `width` x `height` frame.
    ///
    /// `None` when the ROI is inactive or lies entirely outside the frame.
    pub fn bounding_box(&self, width: u32, height: u32) -> Option<PixelRect> {
        if !self.is_active() || width == 0 || height == 0 {
            return None;
        }
        let min_x = self.points.iter().map(|p| p.x).min()?;
        let max_x = self.points.iter().map(|p| p.x).max()?;
        let min_y = self.points.iter().map(|p| p.y).min()?;
        let max_y = self.points.iter().map(|p| p.y).max()?;

        let frame_max_x = (width - 1) as i64;
        let frame_max_y = (height - 1) as i64;
        if (max_x as i64) < 0
            || (max_y as i64) < 0
            || min_x as i64 > frame_max_x
            || min_y as i64 > frame_max_y
        {
            return None;
        }
        Some(PixelRect {
            min_x: (min_x as i64).clamp(0, frame_max_x) as u32,
            min_y: (min_y as i64).clamp(0, frame_max_y) as u32,
            max_x: (max_x as i64).clamp(0, frame_max_x) as u32,
            max_y: (max_y as i64).clamp(0, frame_max_y) as u32,
        })
    }
}

fn on_segment(px: i128, py: i128, ax: i128, ay: i128, bx: i128, by: i128) -> bool {
    let cross = (bx - ax) * (py - ay) - (by - ay) * (px - ax);
    cross == 0 && px >= ax.min(bx) && px <= ax.max(bx) && py >= ay.min(by) && py <= ay.max(by)
}

/// Parse `"x,y;x,y;..."` into polygon vertices.
pub fn parse_points(raw: &str) -> Result<Vec<Point>> {
    raw.split(';')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (x, y) = pair
                .split_once(',')
                .ok_or_else(|| anyhow!("expected 'x,y', got '{}'", pair))?;
            let x = x.trim().parse().map_err(|_| anyhow!("bad x coordinate in '{}'", pair))?;
            let y = y.trim().parse().map_err(|_| anyhow!("bad y coordinate in '{}'", pair))?;
            Ok(Point::new(x, y))
        })
        .collect()
}

/// Apply an ROI snapshot to a frame.
///
/// Inactive ROIs return the input frame untouched. Otherwise the result has
/// the same dimensions with every pixel outside the polygon set to
/// [`MASK_FILL`].
pub fn apply(frame: Frame, roi: &RegionOfInterest) -> Frame {
    if !roi.is_active() {
        return frame;
    }

    let width = frame.width();
    let len = frame.pixels().len();
    let mut out = MASK_FILL.iter().copied().cycle().take(len).collect::<Vec<u8>>();

    if let Some(rect) = roi.bounding_box(frame.width(), frame.height()) {
        let src = frame.pixels();
        for y in rect.min_y..=rect.max_y {
            for x in rect.min_x..=rect.max_x {
                if roi.contains(Point::new(x as i32, y as i32)) {
                    let offset = (y as usize * width as usize + x as usize) * BYTES_PER_PIXEL;
                    out[offset..offset + BYTES_PER_PIXEL]
                        .copy_from_slice(&src[offset..offset + BYTES_PER_PIXEL]);
                }
            }
        }
    }

    frame.with_pixels(out)
}

/// ROI shared between the consumer (writer) and the acquisition loop (reader).
///
/// Writers replace the whole region; readers take an `Arc` snapshot, so a
/// reader never sees a half-updated polygon.
#[derive(Clone, Debug, Default)]
pub struct SharedRoi {
    current: Arc<RwLock<Arc<RegionOfInterest>>>,
}

impl SharedRoi {
    pub fn new(initial: RegionOfInterest) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(initial))),
        }
    }

    pub fn snapshot(&self) -> Arc<RegionOfInterest> {
        let guard = self
            .current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&*guard)
    }

    pub fn replace(&self, roi: RegionOfInterest) {
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::new(roi);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(min: i32, max: i32) -> RegionOfInterest {
        RegionOfInterest::new(
            vec![
                Point::new(min, min),
                Point::new(max, min),
                Point::new(max, max),
                Point::new(min, max),
            ],
            true,
        )
    }

    fn gradient(width: u32, height: u32) -> Frame {
        let mut data = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&[x as u8 + 1, y as u8 + 1, 200]);
            }
        }
        Frame::from_rgb(data, width, height).expect("frame")
    }

    #[test]
    fn boundary_points_are_inside() {
        let roi = square(2, 6);
        assert!(roi.contains(Point::new(2, 2)));
        assert!(roi.contains(Point::new(4, 2)));
        assert!(roi.contains(Point::new(6, 4)));
        assert!(roi.contains(Point::new(4, 4)));
        assert!(!roi.contains(Point::new(1, 4)));
        assert!(!roi.contains(Point::new(7, 7)));
    }

    #[test]
    fn concave_polygon_excludes_notch() {
        // U shape opening upwards; (5, 2) sits in the notch.
        let roi = RegionOfInterest::new(
            vec![
                Point::new(0, 0),
                Point::new(3, 0),
                Point::new(3, 6),
                Point::new(7, 6),
                Point::new(7, 0),
                Point::new(10, 0),
                Point::new(10, 10),
                Point::new(0, 10),
            ],
            true,
        );
        assert!(!roi.contains(Point::new(5, 2)));
        assert!(roi.contains(Point::new(5, 8)));
        assert!(roi.contains(Point::new(1, 1)));
        assert!(roi.contains(Point::new(8, 1)));
    }

    #[test]
    fn mask_keeps_inside_and_blacks_outside() {
        let frame = gradient(10, 10);
        let original = frame.clone();
        let roi = RegionOfInterest::new(
            vec![Point::new(1, 1), Point::new(8, 1), Point::new(4, 8)],
            true,
        );

        let masked = apply(frame, &roi);
        assert_eq!(masked.width(), 10);
        assert_eq!(masked.height(), 10);

        for y in 0..10 {
            for x in 0..10 {
                let p = Point::new(x as i32, y as i32);
                let got = masked.pixel(x, y).unwrap();
                if roi.contains(p) {
                    assert_eq!(got, original.pixel(x, y).unwrap(), "inside ({x},{y})");
                } else {
                    assert_eq!(got, MASK_FILL, "outside ({x},{y})");
                }
            }
        }
    }

    #[test]
    fn inactive_roi_is_identity() {
        let frame = gradient(6, 4);
        let expected = frame.pixels().to_vec();

        let disabled = RegionOfInterest {
            enabled: false,
            ..square(1, 3)
        };
        let frame = apply(frame, &disabled);
        assert_eq!(frame.pixels(), expected.as_slice());

        let degenerate = RegionOfInterest::new(vec![Point::new(0, 0), Point::new(5, 3)], true);
        let frame = apply(frame, &degenerate);
        assert_eq!(frame.pixels(), expected.as_slice());
    }

    #[test]
    fn polygon_partly_outside_frame_is_clipped() {
        let frame = gradient(4, 4);
        let roi = square(-10, 1);
        let masked = apply(frame, &roi);

        assert_eq!(masked.pixel(0, 0), Some([1, 1, 200]));
        assert_eq!(masked.pixel(1, 1), Some([2, 2, 200]));
        assert_eq!(masked.pixel(2, 2), Some(MASK_FILL));
        assert_eq!(
            roi.bounding_box(4, 4),
            Some(PixelRect {
                min_x: 0,
                min_y: 0,
                max_x: 1,
                max_y: 1
            })
        );
    }

    #[test]
    fn polygon_outside_frame_masks_everything() {
        let masked = apply(gradient(4, 4), &square(20, 30));
        assert!(masked.pixels().iter().all(|&b| b == 0));
    }

    #[test]
    fn shared_roi_snapshot_is_stable_across_replace() {
        let shared = SharedRoi::new(square(0, 4));
        let before = shared.snapshot();
        shared.replace(RegionOfInterest::disabled());

        assert!(before.is_active());
        assert!(!shared.snapshot().is_active());
    }

    #[test]
    fn points_deserialize_from_pairs() {
        let roi: RegionOfInterest =
            serde_json::from_str(r#"{"points": [[0, 0], [4, 0], [4, 4]]}"#).unwrap();
        assert!(roi.enabled);
        assert_eq!(roi.points[1], Point::new(4, 0));
    }

    #[test]
    fn extreme_vertices_do_not_overflow() {
        let roi = RegionOfInterest::new(
            vec![
                Point::new(i32::MIN, i32::MIN),
                Point::new(i32::MAX, i32::MIN + 1),
                Point::new(i32::MAX, i32::MAX),
            ],
            true,
        );
        assert!(!roi.contains(Point::new(0, 1)));
        assert!(roi.contains(Point::new(1, 0)));
        assert!(roi.contains(Point::new(i32::MAX, 0)));

        let masked = apply(gradient(4, 4), &roi);
        assert_eq!(masked.pixel(3, 0), Some([4, 1, 200]));
        assert_eq!(masked.pixel(0, 3), Some(MASK_FILL));

        let huge = square(i32::MIN, i32::MAX);
        let frame = gradient(4, 4);
        let expected = frame.pixels().to_vec();
        assert_eq!(apply(frame, &huge).pixels(), expected.as_slice());
    }

    #[test]
    fn parses_point_lists() {
        assert_eq!(
            parse_points("10,20; 30,40;50,-5;").unwrap(),
            vec![Point::new(10, 20), Point::new(30, 40), Point::new(50, -5)]
        );
        assert!(parse_points("").unwrap().is_empty());
        assert!(parse_points("10;20").is_err());
        assert!(parse_points("a,b").is_err());
    }
}
