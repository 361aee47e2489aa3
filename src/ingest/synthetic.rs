//! Synthetic frame source (`stub://`).
//!
//! Produces a deterministic moving gradient at the requested geometry. An optional
//! `?frames=N` suffix makes the source finite: after N frames it reports
//! `EndOfStream`, which is how tests and demos end a run without a signal.

use anyhow::anyhow;

use super::{FrameSource, ReadOutcome, SourceStats};
use crate::error::{PipelineError, PipelineResult};
use crate::frame::{Frame, FrameGeometry};

pub const STUB_SCHEME: &str = "stub://";

pub struct SyntheticSource {
    device: String,
    limit: Option<u64>,
    geometry: Option<FrameGeometry>,
    frame_count: u64,
    closed: bool,
}

impl SyntheticSource {
    /// Parse a `stub://name[?frames=N]` device string.
    pub fn from_device(device: &str) -> PipelineResult<Self> {
        let rest = device.strip_prefix(STUB_SCHEME).ok_or_else(|| {
            PipelineError::Config(format!("synthetic device must start with {STUB_SCHEME}"))
        })?;
        let limit = match rest.split_once('?') {
            None => None,
            Some((_, query)) => parse_frame_limit(query)?,
        };
        Ok(Self {
            device: device.to_string(),
            limit,
            geometry: None,
            frame_count: 0,
            closed: false,
        })
    }

    /// Finite source producing exactly `frames` frames.
    pub fn finite(name: &str, frames: u64) -> Self {
        Self {
            device: format!("{STUB_SCHEME}{name}?frames={frames}"),
            limit: Some(frames),
            geometry: None,
            frame_count: 0,
            closed: false,
        }
    }

    fn generate_pixels(&self, geometry: FrameGeometry) -> Vec<u8> {
        let width = geometry.width as usize;
        let shift = self.frame_count as usize;
        let mut pixels = Vec::with_capacity(geometry.byte_len());
        for y in 0..geometry.height as usize {
            for x in 0..width {
                let b = ((x + shift) % 256) as u8;
                let g = ((y + shift / 2) % 256) as u8;
                let r = ((x + y) % 256) as u8;
                pixels.extend_from_slice(&[b, g, r]);
            }
        }
        pixels
    }
}

fn parse_frame_limit(query: &str) -> PipelineResult<Option<u64>> {
    for pair in query.split('&') {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        if key == "frames" {
            let frames = value.parse::<u64>().map_err(|_| {
                PipelineError::Config(format!("stub frame count `{value}` is not an integer"))
            })?;
            return Ok(Some(frames));
        }
    }
    Ok(None)
}

impl FrameSource for SyntheticSource {
    fn device(&self) -> &str {
        &self.device
    }

    fn open(&mut self, geometry: FrameGeometry) -> PipelineResult<()> {
        if self.closed {
            return Err(PipelineError::DeviceUnavailable {
                device: self.device.clone(),
                source: anyhow!("synthetic source cannot be reopened after close"),
            });
        }
        self.geometry = Some(geometry);
        log::info!("SyntheticSource: opened {} ({})", self.device, geometry);
        Ok(())
    }

    fn read_frame(&mut self) -> PipelineResult<ReadOutcome> {
        if self.closed {
            return Ok(ReadOutcome::EndOfStream);
        }
        let geometry = self.geometry.ok_or_else(|| PipelineError::CaptureFailed {
            device: self.device.clone(),
            source: anyhow!("read before open"),
        })?;
        if self.limit.is_some_and(|limit| self.frame_count >= limit) {
            return Ok(ReadOutcome::EndOfStream);
        }

        let pixels = self.generate_pixels(geometry);
        self.frame_count += 1;
        let frame = Frame::new(pixels, geometry.width, geometry.height, self.frame_count)?;
        Ok(ReadOutcome::Frame(frame))
    }

    fn close(&mut self) -> PipelineResult<()> {
        if !self.closed {
            log::info!(
                "SyntheticSource: closed {} after {} frames",
                self.device,
                self.frame_count
            );
        }
        self.closed = true;
        Ok(())
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            frames_dropped: 0,
            device: self.device.clone(),
        }
    }
}
