pub mod stub;

pub use stub::{PlateTemplate, StubDetector, StubDetectorSettings};
