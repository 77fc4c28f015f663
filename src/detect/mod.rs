//! Plate candidate detection.
//!
//! Detectors run on the consumer side: the acquisition loop never calls
//! them. A detector sees the masked frame plus the ROI it was masked with and
//! returns zero or more plate candidates.

mod backends;
mod detector;
mod registry;
mod result;

pub use backends::{PlateTemplate, StubDetector, StubDetectorSettings};
pub use detector::CandidateDetector;
pub use registry::DetectorRegistry;
pub use result::{BoundingBox, PlateCandidate};
