use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::detect::{PlateTemplate, StubDetectorSettings};
use crate::ingest::{SourceDescriptor, SourceSettings};
use crate::pipeline::PipelineConfig;
use crate::roi::RegionOfInterest;

const DEFAULT_SOURCE: &str = "stub://front_camera";
const DEFAULT_TARGET_FPS: u32 = 30;
const DEFAULT_MAX_FPS: u32 = 30;
const DEFAULT_WIDTH: u32 = 1280;
const DEFAULT_HEIGHT: u32 = 720;
const DEFAULT_MAX_CONSECUTIVE_TRANSIENT: u32 = 50;
const DEFAULT_PROBE_MAX_INDEX: u32 = 9;
const DEFAULT_CLIP_FRAMES: u64 = 300;

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    source: Option<String>,
    capture: Option<CaptureSectionFile>,
    probe: Option<ProbeSectionFile>,
    synthetic: Option<SyntheticSectionFile>,
    roi: Option<RegionOfInterest>,
    detector: Option<DetectorSectionFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureSectionFile {
    target_fps: Option<u32>,
    max_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    max_consecutive_transient: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ProbeSectionFile {
    max_index: Option<u32>,
    synthetic_devices: Option<Vec<u32>>,
}

#[derive(Debug, Deserialize, Default)]
struct SyntheticSectionFile {
    clip_frames: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorSectionFile {
    confidence_threshold: Option<f32>,
    detection_rate: Option<f64>,
    template: Option<String>,
}

/// Everything the capture demo needs to build a pipeline.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Source opened on start.
    pub source: SourceDescriptor,
    /// Handed to `SystemOpener`.
    pub sources: SourceSettings,
    pub pipeline: PipelineConfig,
    pub detector: StubDetectorSettings,
}

impl CaptureConfig {
    /// Load from the file named by `ANPR_CONFIG` (if set), then apply
    /// `ANPR_*` environment overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("ANPR_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: CaptureConfigFile) -> Result<Self> {
        let source = file
            .source
            .as_deref()
            .unwrap_or(DEFAULT_SOURCE)
            .parse()
            .context("invalid source in config file")?;

        let capture = file.capture.unwrap_or_default();
        let probe = file.probe.unwrap_or_default();
        let synthetic = file.synthetic.unwrap_or_default();
        let detector = file.detector.unwrap_or_default();

        let sources = SourceSettings {
            target_fps: capture.target_fps.unwrap_or(DEFAULT_TARGET_FPS),
            width: capture.width.unwrap_or(DEFAULT_WIDTH),
            height: capture.height.unwrap_or(DEFAULT_HEIGHT),
            synthetic_clip_frames: synthetic.clip_frames.unwrap_or(DEFAULT_CLIP_FRAMES),
            synthetic_devices: probe.synthetic_devices.unwrap_or_default(),
        };
        let pipeline = PipelineConfig {
            max_fps: capture.max_fps.unwrap_or(DEFAULT_MAX_FPS),
            max_consecutive_transient: capture
                .max_consecutive_transient
                .unwrap_or(DEFAULT_MAX_CONSECUTIVE_TRANSIENT),
            probe_max_index: probe.max_index.unwrap_or(DEFAULT_PROBE_MAX_INDEX),
            initial_roi: file.roi.unwrap_or_else(RegionOfInterest::disabled),
        };

        let defaults = StubDetectorSettings::default();
        let detector = StubDetectorSettings {
            confidence_threshold: detector
                .confidence_threshold
                .unwrap_or(defaults.confidence_threshold),
            detection_rate: detector.detection_rate.unwrap_or(defaults.detection_rate),
            template: match detector.template {
                Some(raw) => raw.parse()?,
                None => PlateTemplate::default(),
            },
        };

        Ok(Self {
            source,
            sources,
            pipeline,
            detector,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(source) = std::env::var("ANPR_SOURCE") {
            if !source.trim().is_empty() {
                self.source = source
                    .parse()
                    .map_err(|e| anyhow!("ANPR_SOURCE is invalid: {}", e))?;
            }
        }
        if let Some(fps) = env_number::<u32>("ANPR_TARGET_FPS")? {
            self.sources.target_fps = fps;
        }
        if let Some(fps) = env_number::<u32>("ANPR_MAX_FPS")? {
            self.pipeline.max_fps = fps;
        }
        if let Some(index) = env_number::<u32>("ANPR_PROBE_MAX_INDEX")? {
            self.pipeline.probe_max_index = index;
        }
        if let Ok(devices) = std::env::var("ANPR_STUB_DEVICES") {
            self.sources.synthetic_devices = split_csv(&devices)
                .iter()
                .map(|entry| {
                    entry.parse::<u32>().map_err(|_| {
                        anyhow!("ANPR_STUB_DEVICES must be a comma-separated list of indices")
                    })
                })
                .collect::<Result<_>>()?;
        }
        if let Some(threshold) = env_number::<f32>("ANPR_CONFIDENCE_THRESHOLD")? {
            self.detector.confidence_threshold = threshold;
        }
        if let Ok(template) = std::env::var("ANPR_PLATE_TEMPLATE") {
            if !template.trim().is_empty() {
                self.detector.template = template.parse()?;
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.sources.target_fps == 0 {
            bail!("capture.target_fps must be greater than zero");
        }
        if self.sources.width == 0 || self.sources.height == 0 {
            bail!("capture.width and capture.height must be greater than zero");
        }
        if !(0.0..=1.0).contains(&self.detector.confidence_threshold) {
            bail!("detector.confidence_threshold must be within [0, 1]");
        }
        if !(0.0..=1.0).contains(&self.detector.detection_rate) {
            bail!("detector.detection_rate must be within [0, 1]");
        }
        let roi = &self.pipeline.initial_roi;
        if roi.enabled && roi.points.len() < 3 {
            bail!(
                "roi.enabled requires at least 3 points, got {}",
                roi.points.len()
            );
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<CaptureConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_number<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a number, got '{}'", key, raw)),
        _ => Ok(None),
    }
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
