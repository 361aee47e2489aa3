//! V4L2 capture backend (feature: ingest-v4l2).

use anyhow::{anyhow, Context};
use ouroboros::self_referencing;
use std::time::{Duration, Instant};

use super::normalize::{normalize_to_bgr, PixelFormat};
use super::{ReadOutcome, SourceStats};
use crate::error::{PipelineError, PipelineResult};
use crate::frame::{Frame, FrameGeometry};

/// Formats tried in order; the first the driver accepts wins.
const PREFERRED_FOURCCS: [&[u8; 4]; 3] = [b"BGR3", b"YUYV", b"RGB3"];
const MMAP_BUFFERS: u32 = 4;

pub(crate) struct DeviceCapture {
    path: String,
    target_fps: u32,
    state: Option<DeviceState>,
    geometry: Option<FrameGeometry>,
    format: PixelFormat,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
}

#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl DeviceCapture {
    pub(crate) fn new(path: String, target_fps: u32) -> Self {
        Self {
            path,
            target_fps,
            state: None,
            geometry: None,
            format: PixelFormat::Bgr24,
            frame_count: 0,
            last_frame_at: None,
            last_error: None,
        }
    }

    pub(crate) fn device(&self) -> &str {
        &self.path
    }

    fn unavailable(&self, source: anyhow::Error) -> PipelineError {
        PipelineError::DeviceUnavailable {
            device: self.path.clone(),
            source,
        }
    }

    pub(crate) fn open(&mut self, geometry: FrameGeometry) -> PipelineResult<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let device = v4l::Device::with_path(&self.path)
            .with_context(|| format!("open v4l2 device {}", self.path))
            .map_err(|err| self.unavailable(err))?;

        let mut negotiated = None;
        for fourcc in PREFERRED_FOURCCS {
            let mut format = device
                .format()
                .context("read v4l2 format")
                .map_err(|err| self.unavailable(err))?;
            format.width = geometry.width;
            format.height = geometry.height;
            format.fourcc = v4l::FourCC::new(fourcc);
            match device.set_format(&format) {
                Ok(applied) if applied.fourcc.repr == *fourcc => {
                    negotiated = Some(applied);
                    break;
                }
                Ok(applied) => log::debug!(
                    "V4l2Source: {} substituted {} for {}",
                    self.path,
                    applied.fourcc,
                    v4l::FourCC::new(fourcc)
                ),
                Err(err) => log::debug!(
                    "V4l2Source: {} rejected {}: {}",
                    self.path,
                    v4l::FourCC::new(fourcc),
                    err
                ),
            }
        }
        let format = negotiated
            .ok_or_else(|| self.unavailable(anyhow!("no supported pixel format (BGR3/YUYV/RGB3)")))?;

        if format.width != geometry.width || format.height != geometry.height {
            return Err(self.unavailable(anyhow!(
                "device delivers {}x{}, requested {}",
                format.width,
                format.height,
                geometry
            )));
        }
        self.format = PixelFormat::from_fourcc(&format.fourcc.repr)
            .ok_or_else(|| self.unavailable(anyhow!("unexpected format {}", format.fourcc)))?;

        if self.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "V4l2Source: failed to set fps on {}: {}",
                    self.path,
                    err
                );
            }
        }

        let state = DeviceStateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, MMAP_BUFFERS)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()
        .map_err(|err| self.unavailable(err))?;

        self.state = Some(state);
        self.geometry = Some(geometry);
        self.last_error = None;
        log::info!(
            "V4l2Source: connected to {} ({} {:?})",
            self.path,
            geometry,
            self.format
        );
        Ok(())
    }

    pub(crate) fn read_frame(&mut self) -> PipelineResult<ReadOutcome> {
        use v4l::io::traits::CaptureStream;

        let (Some(state), Some(geometry)) = (self.state.as_mut(), self.geometry) else {
            return Ok(ReadOutcome::EndOfStream);
        };
        let format = self.format;

        let captured = state.with_mut(|fields| {
            let (buf, meta) = fields
                .stream
                .next()
                .map_err(|err| anyhow::Error::new(err).context("capture v4l2 frame"))?;
            let used = (meta.bytesused as usize).min(buf.len());
            let used = if used == 0 { buf.len() } else { used };
            normalize_to_bgr(&buf[..used], geometry.width, geometry.height, format)
        });

        let pixels = match captured {
            Ok(pixels) => pixels,
            Err(err) => {
                self.last_error = Some(err.to_string());
                return Err(PipelineError::CaptureFailed {
                    device: self.path.clone(),
                    source: err,
                });
            }
        };

        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        let frame = Frame::new(pixels, geometry.width, geometry.height, self.frame_count)?;
        Ok(ReadOutcome::Frame(frame))
    }

    pub(crate) fn close(&mut self) -> PipelineResult<()> {
        if self.state.take().is_some() {
            log::info!(
                "V4l2Source: released {} after {} frames",
                self.path,
                self.frame_count
            );
        }
        Ok(())
    }

    pub(crate) fn is_healthy(&self) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        let Some(last_frame_at) = self.last_frame_at else {
            return true;
        };
        last_frame_at.elapsed() <= self.health_grace()
    }

    pub(crate) fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            frames_dropped: 0,
            device: self.path.clone(),
        }
    }

    fn health_grace(&self) -> Duration {
        let base_ms = if self.target_fps == 0 {
            2_000
        } else {
            (1000 / self.target_fps).saturating_mul(6)
        };
        Duration::from_millis(base_ms.max(2_000) as u64)
    }
}
