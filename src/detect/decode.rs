use anyhow::{anyhow, Result};

use crate::detect::labels::class_name;
use crate::detect::result::Detection;

/// Decoding parameters for a YOLOv8-style head.
#[derive(Clone, Copy, Debug)]
pub struct DecodeParams {
    /// Minimum class score kept before NMS.
    pub confidence_threshold: f32,
    /// Model-input to frame scale factors.
    pub scale_x: f32,
    pub scale_y: f32,
    /// Frame bounds used to clip boxes.
    pub frame_width: f32,
    pub frame_height: f32,
}

/// Decode a channel-major `[4 + classes, anchors]` output tensor.
///
/// Rows 0..4 hold `cx, cy, w, h` in model-input pixels; the remaining rows hold
/// per-class scores. Each anchor contributes at most one detection (its best class).
pub fn decode_yolov8(data: &[f32], channels: usize, anchors: usize, params: DecodeParams) -> Result<Vec<Detection>> {
    if channels <= 4 {
        return Err(anyhow!("YOLO output needs more than 4 channels, got {}", channels));
    }
    let expected = channels
        .checked_mul(anchors)
        .ok_or_else(|| anyhow!("YOLO output shape overflows"))?;
    if data.len() != expected {
        return Err(anyhow!(
            "YOLO output length mismatch: expected {}x{}={}, got {}",
            channels,
            anchors,
            expected,
            data.len()
        ));
    }

    let at = |row: usize, anchor: usize| data[row * anchors + anchor];
    let mut detections = Vec::new();
    for anchor in 0..anchors {
        let (best_class, best_score) = (4..channels)
            .map(|row| (row - 4, at(row, anchor)))
            .fold((0usize, f32::NEG_INFINITY), |best, current| {
                if current.1 > best.1 {
                    current
                } else {
                    best
                }
            });
        if !best_score.is_finite() || best_score < params.confidence_threshold {
            continue;
        }

        let cx = at(0, anchor) * params.scale_x;
        let cy = at(1, anchor) * params.scale_y;
        let w = at(2, anchor) * params.scale_x;
        let h = at(3, anchor) * params.scale_y;
        let bbox = [
            (cx - w / 2.0).clamp(0.0, params.frame_width),
            (cy - h / 2.0).clamp(0.0, params.frame_height),
            (cx + w / 2.0).clamp(0.0, params.frame_width),
            (cy + h / 2.0).clamp(0.0, params.frame_height),
        ];
        detections.push(Detection::new(bbox, best_class, class_name(best_class), best_score));
    }
    Ok(detections)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> DecodeParams {
        DecodeParams {
            confidence_threshold: 0.25,
            scale_x: 2.0,
            scale_y: 1.0,
            frame_width: 200.0,
            frame_height: 100.0,
        }
    }

    #[test]
    fn decodes_best_class_above_threshold() -> Result<()> {
        // 4 box rows + 2 classes, 2 anchors (channel-major).
        let data = vec![
            10.0, 50.0, // cx
            20.0, 50.0, // cy
            4.0, 10.0, // w
            8.0, 10.0, // h
            0.1, 0.2, // class 0
            0.9, 0.1, // class 1
        ];
        let detections = decode_yolov8(&data, 6, 2, params())?;
        assert_eq!(detections.len(), 1);
        let det = &detections[0];
        assert_eq!(det.class_id, 1);
        assert_eq!(det.label, "bicycle");
        assert_eq!(det.bbox, [16.0, 16.0, 24.0, 24.0]);
        Ok(())
    }

    #[test]
    fn boxes_are_clipped_to_frame() -> Result<()> {
        let data = vec![0.0, 0.0, 400.0, 400.0, 0.99];
        let detections = decode_yolov8(&data, 5, 1, params())?;
        assert_eq!(detections[0].bbox, [0.0, 0.0, 200.0, 100.0]);
        Ok(())
    }

    #[test]
    fn rejects_mismatched_shape() {
        assert!(decode_yolov8(&[0.0; 7], 6, 2, params()).is_err());
        assert!(decode_yolov8(&[0.0; 4], 4, 1, params()).is_err());
    }
}
