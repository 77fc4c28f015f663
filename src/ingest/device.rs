//! Local capture device source.
//!
//! Opens a device by index. Indices listed in `SourceSettings::synthetic_devices`
//! open as synthetic cameras; everything else goes to V4L2 when the
//! `ingest-v4l2` feature is compiled in.

use super::synthetic::{SyntheticOptions, SyntheticSource};
#[cfg(feature = "ingest-v4l2")]
use super::v4l2::V4l2Capture;
use super::{FrameSource, OpenError, ReadError, SourceSettings, SourceStats};
use crate::frame::Frame;

/// Local capture device.
pub struct DeviceSource {
    backend: DeviceBackend,
}

enum DeviceBackend {
    Synthetic(SyntheticSource),
    #[cfg(feature = "ingest-v4l2")]
    V4l2(V4l2Capture),
}

impl DeviceSource {
    pub fn open(index: u32, settings: &SourceSettings) -> Result<Self, OpenError> {
        if settings.synthetic_devices.contains(&index) {
            return Ok(Self {
                backend: DeviceBackend::Synthetic(SyntheticSource::new(
                    format!("camera{}", index),
                    settings.width,
                    settings.height,
                    settings.target_fps,
                    SyntheticOptions::default(),
                )),
            });
        }

        #[cfg(feature = "ingest-v4l2")]
        {
            let mut capture = V4l2Capture::new(index, settings);
            capture
                .connect()
                .map_err(|err| OpenError::Unavailable(format!("{:#}", err)))?;
            Ok(Self {
                backend: DeviceBackend::V4l2(capture),
            })
        }
        #[cfg(not(feature = "ingest-v4l2"))]
        {
            Err(OpenError::Unavailable(format!(
                "device {} requires the ingest-v4l2 feature",
                index
            )))
        }
    }
}

impl FrameSource for DeviceSource {
    fn label(&self) -> String {
        match &self.backend {
            DeviceBackend::Synthetic(source) => source.label(),
            #[cfg(feature = "ingest-v4l2")]
            DeviceBackend::V4l2(source) => source.label(),
        }
    }

    fn read_next(&mut self) -> Result<Frame, ReadError> {
        match &mut self.backend {
            DeviceBackend::Synthetic(source) => source.read_next(),
            #[cfg(feature = "ingest-v4l2")]
            DeviceBackend::V4l2(source) => source.read_next(),
        }
    }

    fn close(&mut self) {
        match &mut self.backend {
            DeviceBackend::Synthetic(source) => source.close(),
            #[cfg(feature = "ingest-v4l2")]
            DeviceBackend::V4l2(source) => source.close(),
        }
    }

    fn stats(&self) -> SourceStats {
        match &self.backend {
            DeviceBackend::Synthetic(source) => source.stats(),
            #[cfg(feature = "ingest-v4l2")]
            DeviceBackend::V4l2(source) => source.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> SourceSettings {
        SourceSettings {
            target_fps: 0,
            width: 32,
            height: 16,
            synthetic_devices: vec![0],
            ..SourceSettings::default()
        }
    }

    #[test]
    fn synthetic_device_produces_frames() {
        let mut source = DeviceSource::open(0, &settings()).unwrap();
        let frame = source.read_next().unwrap();
        assert_eq!((frame.width(), frame.height()), (32, 16));
        assert_eq!(source.label(), "camera0");
    }

    #[cfg(not(feature = "ingest-v4l2"))]
    #[test]
    fn unlisted_device_is_unavailable_without_v4l2() {
        let err = DeviceSource::open(5, &settings()).err().unwrap();
        assert!(matches!(err, OpenError::Unavailable(_)));
    }
}
