//! Camera frame source.
//!
//! `CameraSource` is the pipeline's FrameSource for a local camera. It picks a
//! backend from the device string:
//! - `stub://...`: synthetic frames
//! - `/dev/videoN` or a bare index `N`: V4L2 device (feature: ingest-v4l2)
//!
//! The source is responsible for:
//! - Negotiating the requested resolution with the device
//! - Converting whatever the device delivers into packed BGR
//! - Releasing the device on `close` (idempotent)

use anyhow::anyhow;

#[cfg(feature = "ingest-v4l2")]
use super::device::DeviceCapture;
use super::synthetic::{SyntheticSource, STUB_SCHEME};
use super::{FrameSource, ReadOutcome, SourceStats};
use crate::error::{PipelineError, PipelineResult};
use crate::frame::FrameGeometry;

/// Configuration for a camera source.
#[derive(Clone, Debug)]
pub struct CameraConfig {
    /// Device path (e.g. "/dev/video0"), index ("0") or "stub://name".
    pub device: String,
    /// Requested capture rate. 0 keeps the device default.
    pub target_fps: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            target_fps: 30,
        }
    }
}

pub struct CameraSource {
    backend: CameraBackend,
}

enum CameraBackend {
    Synthetic(SyntheticSource),
    #[cfg(feature = "ingest-v4l2")]
    Device(DeviceCapture),
    /// Device path given but no capture backend compiled in.
    #[cfg_attr(feature = "ingest-v4l2", allow(dead_code))]
    Unsupported(String),
}

impl CameraSource {
    pub fn new(config: CameraConfig) -> PipelineResult<Self> {
        let backend = if config.device.starts_with(STUB_SCHEME) {
            CameraBackend::Synthetic(SyntheticSource::from_device(&config.device)?)
        } else {
            let path = resolve_device_path(&config.device);
            #[cfg(feature = "ingest-v4l2")]
            {
                CameraBackend::Device(DeviceCapture::new(path, config.target_fps))
            }
            #[cfg(not(feature = "ingest-v4l2"))]
            {
                CameraBackend::Unsupported(path)
            }
        };
        Ok(Self { backend })
    }
}

/// Map a bare index ("0") to its V4L2 node; anything else is used as-is.
pub fn resolve_device_path(device: &str) -> String {
    let trimmed = device.trim();
    if !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit()) {
        format!("/dev/video{trimmed}")
    } else {
        trimmed.to_string()
    }
}

impl FrameSource for CameraSource {
    fn device(&self) -> &str {
        match &self.backend {
            CameraBackend::Synthetic(source) => source.device(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.device(),
            CameraBackend::Unsupported(path) => path,
        }
    }

    fn open(&mut self, geometry: FrameGeometry) -> PipelineResult<()> {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.open(geometry),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.open(geometry),
            CameraBackend::Unsupported(path) => Err(PipelineError::DeviceUnavailable {
                device: path.clone(),
                source: anyhow!("camera capture requires the ingest-v4l2 feature"),
            }),
        }
    }

    fn read_frame(&mut self) -> PipelineResult<ReadOutcome> {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.read_frame(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.read_frame(),
            CameraBackend::Unsupported(_) => Ok(ReadOutcome::EndOfStream),
        }
    }

    fn close(&mut self) -> PipelineResult<()> {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.close(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.close(),
            CameraBackend::Unsupported(_) => Ok(()),
        }
    }

    fn stats(&self) -> SourceStats {
        match &self.backend {
            CameraBackend::Synthetic(source) => source.stats(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.stats(),
            CameraBackend::Unsupported(path) => SourceStats {
                device: path.clone(),
                ..SourceStats::default()
            },
        }
    }

    fn is_healthy(&self) -> bool {
        match &self.backend {
            CameraBackend::Synthetic(source) => source.is_healthy(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.is_healthy(),
            CameraBackend::Unsupported(_) => false,
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_config() -> CameraConfig {
        CameraConfig {
            device: "stub://test?frames=2".to_string(),
            target_fps: 30,
        }
    }

    #[test]
    fn camera_source_produces_frames() -> PipelineResult<()> {
        let mut source = CameraSource::new(stub_config())?;
        source.open(FrameGeometry::new(640, 480)?)?;

        let ReadOutcome::Frame(frame) = source.read_frame()? else {
            panic!("expected a frame");
        };
        assert_eq!(frame.width(), 640);
        assert_eq!(frame.height(), 480);
        source.close()?;
        Ok(())
    }

    #[test]
    fn bare_index_maps_to_video_node() {
        assert_eq!(resolve_device_path("0"), "/dev/video0");
        assert_eq!(resolve_device_path(" 2 "), "/dev/video2");
        assert_eq!(resolve_device_path("/dev/video1"), "/dev/video1");
    }

    #[cfg(not(feature = "ingest-v4l2"))]
    #[test]
    fn device_without_backend_is_unavailable() -> PipelineResult<()> {
        let mut source = CameraSource::new(CameraConfig::default())?;
        let err = source.open(FrameGeometry::new(640, 480)?).unwrap_err();
        assert!(matches!(err, PipelineError::DeviceUnavailable { .. }));
        source.close()?;
        Ok(())
    }
}
