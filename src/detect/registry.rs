use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use crate::detect::detector::CandidateDetector;
use crate::detect::result::PlateCandidate;
use crate::frame::Frame;
use crate::roi::RegionOfInterest;

/// Named detectors with a default selection.
///
/// Detectors are wrapped in `Mutex` because `CandidateDetector::detect` takes `&mut self`.
pub struct DetectorRegistry {
    detectors: HashMap<String, Arc<Mutex<dyn CandidateDetector>>>,
    default_name: Option<String>,
}

impl DetectorRegistry {
    pub fn new() -> Self {
        Self {
            detectors: HashMap::new(),
            default_name: None,
        }
    }

    /// Register a detector. The first registered detector becomes the default.
    pub fn register<D: CandidateDetector + 'static>(&mut self, detector: D) {
        let name = detector.name().to_string();
        if self.default_name.is_none() {
            self.default_name = Some(name.clone());
        }
        self.detectors.insert(name, Arc::new(Mutex::new(detector)));
    }

    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.detectors.contains_key(name) {
            return Err(anyhow!("detector '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<Mutex<dyn CandidateDetector>>> {
        self.detectors.get(name).cloned()
    }

    pub fn default_detector(&self) -> Option<Arc<Mutex<dyn CandidateDetector>>> {
        self.default_name.as_ref().and_then(|name| self.get(name))
    }

    /// Registered names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.detectors.keys().cloned().collect();
        names.sort();
        names
    }

    /// Run the default detector.
    pub fn detect(&self, frame: &Frame, roi: &RegionOfInterest) -> Result<Vec<PlateCandidate>> {
        let detector = self
            .default_detector()
            .ok_or_else(|| anyhow!("no detector registered"))?;
        let mut guard = detector
            .lock()
            .map_err(|_| anyhow!("detector lock poisoned"))?;
        guard.detect(frame, roi)
    }

    /// Call `warm_up` on every registered detector.
    pub fn warm_up_all(&self) -> Result<()> {
        for (name, detector) in &self.detectors {
            let mut guard = detector
                .lock()
                .map_err(|_| anyhow!("detector '{}' lock poisoned", name))?;
            guard
                .warm_up()
                .map_err(|err| anyhow!("warm up detector '{}': {}", name, err))?;
        }
        Ok(())
    }
}

impl Default for DetectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
