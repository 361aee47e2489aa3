use anyhow::{bail, Result};

use crate::detect::backend::Detector;
use crate::detect::result::{Detection, DetectionOutput, StageTiming};
use crate::frame::Frame;

/// Stub detector for tests and hardware-free runs.
///
/// Returns a fixed set of detections (empty by default) with fixed stage timings.
/// It never looks at pixel data.
pub struct StubDetector {
    detections: Vec<Detection>,
    timing: StageTiming,
    fail_on_frame: Option<u64>,
    calls: u64,
}

impl StubDetector {
    pub fn new() -> Self {
        Self {
            detections: Vec::new(),
            timing: StageTiming::from_millis(1.0, 10.0, 1.0),
            fail_on_frame: None,
            calls: 0,
        }
    }

    pub fn with_detections(mut self, detections: Vec<Detection>) -> Self {
        self.detections = detections;
        self
    }

    pub fn with_timing(mut self, timing: StageTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Fail when asked to detect the frame with this capture sequence.
    pub fn failing_on(mut self, sequence: u64) -> Self {
        self.fail_on_frame = Some(sequence);
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl Default for StubDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector for StubDetector {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, frame: &Frame) -> Result<DetectionOutput> {
        self.calls += 1;
        if self.fail_on_frame == Some(frame.sequence()) {
            bail!("stub detector configured to fail on frame #{}", frame.sequence());
        }
        Ok(DetectionOutput {
            detections: self.detections.clone(),
            timing: self.timing,
        })
    }
}
