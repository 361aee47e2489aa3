use std::time::Duration;

/// One object found in one frame. No identity across frames.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    /// Corner box `[x1, y1, x2, y2]` in frame pixel coordinates.
    pub bbox: [f32; 4],
    pub class_id: usize,
    pub label: String,
    /// Confidence in `[0, 1]`.
    pub confidence: f32,
}

impl Detection {
    pub fn new(bbox: [f32; 4], class_id: usize, label: impl Into<String>, confidence: f32) -> Self {
        Self {
            bbox,
            class_id,
            label: label.into(),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    pub fn width(&self) -> f32 {
        (self.bbox[2] - self.bbox[0]).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.bbox[3] - self.bbox[1]).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Intersection over union with another box.
    pub fn iou(&self, other: &Detection) -> f32 {
        let ix1 = self.bbox[0].max(other.bbox[0]);
        let iy1 = self.bbox[1].max(other.bbox[1]);
        let ix2 = self.bbox[2].min(other.bbox[2]);
        let iy2 = self.bbox[3].min(other.bbox[3]);
        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

/// Per-stage latency reported by a detector for one frame.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StageTiming {
    pub preprocess: Duration,
    pub inference: Duration,
    pub postprocess: Duration,
}

impl StageTiming {
    /// Build from millisecond values; negative or non-finite inputs become zero.
    pub fn from_millis(preprocess: f64, inference: f64, postprocess: f64) -> Self {
        Self {
            preprocess: millis_to_duration(preprocess),
            inference: millis_to_duration(inference),
            postprocess: millis_to_duration(postprocess),
        }
    }

    pub fn preprocess_ms(&self) -> f64 {
        self.preprocess.as_secs_f64() * 1000.0
    }

    pub fn inference_ms(&self) -> f64 {
        self.inference.as_secs_f64() * 1000.0
    }

    pub fn postprocess_ms(&self) -> f64 {
        self.postprocess.as_secs_f64() * 1000.0
    }

    pub fn total_ms(&self) -> f64 {
        self.preprocess_ms() + self.inference_ms() + self.postprocess_ms()
    }
}

fn millis_to_duration(ms: f64) -> Duration {
    if ms.is_finite() && ms > 0.0 {
        Duration::from_secs_f64(ms / 1000.0)
    } else {
        Duration::ZERO
    }
}

/// What a detector returns for one frame.
#[derive(Clone, Debug, Default)]
pub struct DetectionOutput {
    pub detections: Vec<Detection>,
    pub timing: StageTiming,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timing_round_trips_millis() {
        let timing = StageTiming::from_millis(5.0, 15.0, 2.0);
        assert!((timing.total_ms() - 22.0).abs() < 1e-9);
        assert!((timing.inference_ms() - 15.0).abs() < 1e-9);
    }

    #[test]
    fn negative_timing_is_clamped() {
        let timing = StageTiming::from_millis(-1.0, f64::NAN, 3.0);
        assert_eq!(timing.preprocess, Duration::ZERO);
        assert_eq!(timing.inference, Duration::ZERO);
        assert!((timing.total_ms() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn iou_of_identical_and_disjoint_boxes() {
        let a = Detection::new([0.0, 0.0, 10.0, 10.0], 0, "person", 0.9);
        let b = Detection::new([20.0, 20.0, 30.0, 30.0], 0, "person", 0.8);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
        assert_eq!(a.iou(&b), 0.0);
    }
}
