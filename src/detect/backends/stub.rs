use anyhow::{bail, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;

use crate::detect::detector::CandidateDetector;
use crate::detect::result::{BoundingBox, PlateCandidate};
use crate::frame::Frame;
use crate::roi::{PixelRect, RegionOfInterest};

// No I or O.
const PLATE_LETTERS: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ";
const PLATE_DIGITS: &[u8] = b"0123456789";

/// Regional plate layout the stub generates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PlateTemplate {
    /// `ABC-123`
    #[default]
    Eu,
    /// `1234ABC`
    Us,
    /// `AB1234`
    Other,
}

impl FromStr for PlateTemplate {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "EU" => Ok(Self::Eu),
            "US" => Ok(Self::Us),
            "OTHER" => Ok(Self::Other),
            other => bail!("unknown plate template '{}' (expected EU, US or OTHER)", other),
        }
    }
}

impl fmt::Display for PlateTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Eu => "EU",
            Self::Us => "US",
            Self::Other => "OTHER",
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct StubDetectorSettings {
    /// Candidates below this confidence are discarded.
    pub confidence_threshold: f32,
    /// Chance per frame of producing a candidate at all.
    pub detection_rate: f64,
    pub template: PlateTemplate,
}

impl Default for StubDetectorSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.7,
            detection_rate: 0.1,
            template: PlateTemplate::Eu,
        }
    }
}

/// Stub detector for demos and tests. Emits random plates; ignores pixel content.
pub struct StubDetector {
    settings: StubDetectorSettings,
    rng: StdRng,
}

impl StubDetector {
    pub fn new(settings: StubDetectorSettings) -> Self {
        Self::with_rng(settings, StdRng::from_entropy())
    }

    /// Reproducible sequence of candidates for a given seed.
    pub fn seeded(settings: StubDetectorSettings, seed: u64) -> Self {
        Self::with_rng(settings, StdRng::seed_from_u64(seed))
    }

    fn with_rng(mut settings: StubDetectorSettings, rng: StdRng) -> Self {
        settings.detection_rate = settings.detection_rate.clamp(0.0, 1.0);
        settings.confidence_threshold = settings.confidence_threshold.clamp(0.0, 1.0);
        Self { settings, rng }
    }

    pub fn settings(&self) -> &StubDetectorSettings {
        &self.settings
    }

    fn plate_text(&mut self) -> String {
        match self.settings.template {
            PlateTemplate::Eu => {
                format!("{}-{}", self.pick(PLATE_LETTERS, 3), self.pick(PLATE_DIGITS, 3))
            }
            PlateTemplate::Us => {
                format!("{}{}", self.pick(PLATE_DIGITS, 4), self.pick(PLATE_LETTERS, 3))
            }
            PlateTemplate::Other => {
                format!("{}{}", self.pick(PLATE_LETTERS, 2), self.pick(PLATE_DIGITS, 4))
            }
        }
    }

    fn pick(&mut self, alphabet: &[u8], count: usize) -> String {
        (0..count)
            .map(|_| alphabet[self.rng.gen_range(0..alphabet.len())] as char)
            .collect()
    }

    /// Plate-shaped box (4:1) somewhere inside `region`.
    fn place(&mut self, region: PixelRect) -> BoundingBox {
        let width = (region.width() / 4).max(1);
        let height = (width / 4).clamp(1, region.height());
        let x = region.min_x + self.rng.gen_range(0..=region.width() - width);
        let y = region.min_y + self.rng.gen_range(0..=region.height() - height);
        BoundingBox {
            x,
            y,
            width,
            height,
        }
    }
}

impl CandidateDetector for StubDetector {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, frame: &Frame, roi: &RegionOfInterest) -> Result<Vec<PlateCandidate>> {
        let (width, height) = (frame.width(), frame.height());
        if width == 0 || height == 0 {
            return Ok(Vec::new());
        }
        if !self.rng.gen_bool(self.settings.detection_rate) {
            return Ok(Vec::new());
        }

        let confidence: f32 = self.rng.gen_range(0.5..=1.0);
        if confidence < self.settings.confidence_threshold {
            log::debug!(
                "stub candidate below threshold ({:.2} < {:.2})",
                confidence,
                self.settings.confidence_threshold
            );
            return Ok(Vec::new());
        }

        let region = roi.bounding_box(width, height).unwrap_or(PixelRect {
            min_x: 0,
            min_y: 0,
            max_x: width - 1,
            max_y: height - 1,
        });
        let text = self.plate_text();
        let bbox = self.place(region);
        Ok(vec![PlateCandidate {
            text,
            confidence,
            bbox,
            detected_at: SystemTime::now(),
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roi::Point;

    fn always() -> StubDetectorSettings {
        StubDetectorSettings {
            confidence_threshold: 0.0,
            detection_rate: 1.0,
            template: PlateTemplate::Eu,
        }
    }

    fn frame() -> Frame {
        Frame::filled(640, 360, [40, 40, 40]).unwrap()
    }

    fn shape(text: &str) -> String {
        text.chars()
            .map(|c| match c {
                'A'..='Z' => 'L',
                '0'..='9' => 'D',
                other => other,
            })
            .collect()
    }

    #[test]
    fn templates_follow_regional_layout() {
        for (template, expected) in [
            (PlateTemplate::Eu, "LLL-DDD"),
            (PlateTemplate::Us, "DDDDLLL"),
            (PlateTemplate::Other, "LLDDDD"),
        ] {
            let mut detector = StubDetector::seeded(
                StubDetectorSettings {
                    template,
                    ..always()
                },
                7,
            );
            for _ in 0..20 {
                let found = detector.detect(&frame(), &RegionOfInterest::disabled()).unwrap();
                assert_eq!(found.len(), 1);
                assert_eq!(shape(&found[0].text), expected);
                assert!(!found[0].text.contains('I') && !found[0].text.contains('O'));
            }
        }
    }

    #[test]
    fn candidates_respect_threshold_and_range() {
        let mut detector = StubDetector::seeded(
            StubDetectorSettings {
                confidence_threshold: 0.9,
                ..always()
            },
            11,
        );
        let mut seen = 0;
        for _ in 0..200 {
            for candidate in detector.detect(&frame(), &RegionOfInterest::disabled()).unwrap() {
                assert!((0.9..=1.0).contains(&candidate.confidence));
                seen += 1;
            }
        }
        assert!(seen > 0);
    }

    #[test]
    fn zero_rate_never_detects() {
        let mut detector = StubDetector::seeded(
            StubDetectorSettings {
                detection_rate: 0.0,
                ..always()
            },
            3,
        );
        for _ in 0..50 {
            assert!(detector
                .detect(&frame(), &RegionOfInterest::disabled())
                .unwrap()
                .is_empty());
        }
    }

    #[test]
    fn boxes_stay_inside_roi_bounds() {
        let roi = RegionOfInterest::new(
            vec![
                Point::new(100, 50),
                Point::new(300, 50),
                Point::new(300, 200),
                Point::new(100, 200),
            ],
            true,
        );
        let mut detector = StubDetector::seeded(always(), 42);
        for _ in 0..100 {
            let found = detector.detect(&frame(), &roi).unwrap();
            let bbox = found[0].bbox;
            assert!(bbox.x >= 100 && bbox.x + bbox.width <= 301);
            assert!(bbox.y >= 50 && bbox.y + bbox.height <= 201);
        }
    }

    #[test]
    fn boxes_fit_tiny_frames() {
        let tiny = Frame::filled(1, 1, [0, 0, 0]).unwrap();
        let mut detector = StubDetector::seeded(always(), 1);
        let found = detector.detect(&tiny, &RegionOfInterest::disabled()).unwrap();
        assert!(found[0].bbox.fits(1, 1));
    }

    #[test]
    fn same_seed_same_plates() {
        let mut a = StubDetector::seeded(always(), 99);
        let mut b = StubDetector::seeded(always(), 99);
        for _ in 0..10 {
            let ra = a.detect(&frame(), &RegionOfInterest::disabled()).unwrap();
            let rb = b.detect(&frame(), &RegionOfInterest::disabled()).unwrap();
            assert_eq!(ra[0].text, rb[0].text);
            assert_eq!(ra[0].bbox, rb[0].bbox);
        }
    }

    #[test]
    fn template_parsing() {
        assert_eq!("eu".parse::<PlateTemplate>().unwrap(), PlateTemplate::Eu);
        assert_eq!(" US ".parse::<PlateTemplate>().unwrap(), PlateTemplate::Us);
        assert_eq!("other".parse::<PlateTemplate>().unwrap(), PlateTemplate::Other);
        assert!("UK".parse::<PlateTemplate>().is_err());
    }
}
