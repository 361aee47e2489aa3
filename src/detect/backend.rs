use anyhow::Result;

use crate::detect::result::DetectionOutput;
use crate::frame::Frame;

/// Object detector consumed by the pipeline.
///
/// Implementations receive the frame by shared reference and must not retain it
/// past the call. Latency is unbounded as far as the pipeline is concerned; the
/// reported `StageTiming` feeds the overlay's FPS estimate.
pub trait Detector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a packed BGR frame.
    fn detect(&mut self, frame: &Frame) -> Result<DetectionOutput>;

    /// Optional warm-up hook, called once before the first frame.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<D: Detector + ?Sized> Detector for Box<D> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn detect(&mut self, frame: &Frame) -> Result<DetectionOutput> {
        (**self).detect(frame)
    }

    fn warm_up(&mut self) -> Result<()> {
        (**self).warm_up()
    }
}
