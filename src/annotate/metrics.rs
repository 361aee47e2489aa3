use std::fmt;

use crate::detect::StageTiming;

/// Instantaneous model throughput derived from one frame's stage timings.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FpsEstimate {
    Known(f64),
    /// A stage reported zero time, or the sum was not finite; shown as `--`.
    Unknown,
}

impl FpsEstimate {
    pub fn value(&self) -> Option<f64> {
        match self {
            Self::Known(fps) => Some(*fps),
            Self::Unknown => None,
        }
    }
}

impl fmt::Display for FpsEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(fps) => write!(f, "{:.2}", fps),
            Self::Unknown => f.write_str("--"),
        }
    }
}

/// `1000 / (pre + inf + post)` with the sum in milliseconds.
///
/// A zero stage means the backend did not measure it, so the sum is not trusted.
pub fn fps_from_timing(timing: &StageTiming) -> FpsEstimate {
    let stages = [timing.preprocess, timing.inference, timing.postprocess];
    if stages.iter().any(|stage| stage.is_zero()) {
        return FpsEstimate::Unknown;
    }
    let total = timing.total_ms();
    if !total.is_finite() || total <= 0.0 {
        return FpsEstimate::Unknown;
    }
    let fps = 1000.0 / total;
    if fps.is_finite() {
        FpsEstimate::Known(fps)
    } else {
        FpsEstimate::Unknown
    }
}

/// Performance line drawn in the frame's top-left corner.
pub fn overlay_text(timing: &StageTiming) -> String {
    format!(
        "FPS: {}, Pr: {:.2}ms, In: {:.2}ms, Post: {:.2}ms",
        fps_from_timing(timing),
        timing.preprocess_ms(),
        timing.inference_ms(),
        timing.postprocess_ms()
    )
}
