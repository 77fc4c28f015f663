use anyhow::Result;

use crate::detect::result::PlateCandidate;
use crate::frame::Frame;
use crate::roi::RegionOfInterest;

/// Plate candidate detector.
///
/// Implementations receive the frame after the ROI mask has been applied.
/// They must not keep the frame past the `detect` call; a consumer that wants
/// the pixels later clones the frame itself.
pub trait CandidateDetector: Send {
    /// Detector identifier.
    fn name(&self) -> &'static str;

    /// Find plate candidates in a frame.
    ///
    /// Candidate boxes are in frame pixel coordinates and lie inside the
    /// frame. An empty vector means nothing was found.
    fn detect(&mut self, frame: &Frame, roi: &RegionOfInterest) -> Result<Vec<PlateCandidate>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
