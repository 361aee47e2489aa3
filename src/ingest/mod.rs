//! Frame ingestion sources.
//!
//! This module provides the sources the pipeline pulls frames from:
//! - V4L2 cameras (feature: ingest-v4l2)
//! - Synthetic `stub://` source (tests, demos, hardware-free runs)
//! - `DecoupledSource`, a capture thread plus bounded queue around any source
//!
//! Every source hands out packed BGR `Frame`s with exactly the geometry passed to
//! `open`. A source that cannot deliver that geometry fails `open` with
//! `DeviceUnavailable` rather than producing mis-sized frames.

pub mod camera;
pub mod decoupled;
#[cfg(feature = "ingest-v4l2")]
mod device;
mod normalize;
pub mod synthetic;

pub use camera::{CameraConfig, CameraSource};
pub use decoupled::{DecoupledSource, DropPolicy};
pub use synthetic::SyntheticSource;

use crate::error::PipelineResult;
use crate::frame::{Frame, FrameGeometry};

/// Result of a blocking read.
#[derive(Debug)]
pub enum ReadOutcome {
    Frame(Frame),
    /// The source was closed on purpose or ran out of frames. Not an error.
    EndOfStream,
}

/// Capture statistics.
#[derive(Clone, Debug, Default)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub frames_dropped: u64,
    pub device: String,
}

/// A camera-like producer of frames.
///
/// Lifecycle: `open` once, `read_frame` until `EndOfStream` or error, `close`.
/// `close` must be idempotent and safe after any failure.
pub trait FrameSource: Send {
    /// Human-readable device identifier for logs.
    fn device(&self) -> &str;

    /// Configure the device for `geometry`.
    fn open(&mut self, geometry: FrameGeometry) -> PipelineResult<()>;

    /// Block until the next frame is available.
    fn read_frame(&mut self) -> PipelineResult<ReadOutcome>;

    /// Release the device.
    fn close(&mut self) -> PipelineResult<()>;

    fn stats(&self) -> SourceStats;

    fn is_healthy(&self) -> bool {
        true
    }
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn device(&self) -> &str {
        (**self).device()
    }

    fn open(&mut self, geometry: FrameGeometry) -> PipelineResult<()> {
        (**self).open(geometry)
    }

    fn read_frame(&mut self) -> PipelineResult<ReadOutcome> {
        (**self).read_frame()
    }

    fn close(&mut self) -> PipelineResult<()> {
        (**self).close()
    }

    fn stats(&self) -> SourceStats {
        (**self).stats()
    }

    fn is_healthy(&self) -> bool {
        (**self).is_healthy()
    }
}
