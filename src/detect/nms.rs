use std::cmp::Ordering;

use crate::detect::result::Detection;

/// Upper bound on boxes kept per frame.
pub const MAX_DETECTIONS: usize = 300;

/// Class-agnostic non-maximum suppression.
///
/// Boxes are visited in descending confidence; a box is dropped when it overlaps
/// an already kept box by more than `iou_threshold`, regardless of class.
pub fn non_max_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });

    let mut keep: Vec<Detection> = Vec::with_capacity(detections.len().min(MAX_DETECTIONS));
    'outer: for candidate in detections {
        for kept in &keep {
            if candidate.iou(kept) > iou_threshold {
                continue 'outer;
            }
        }
        keep.push(candidate);
        if keep.len() >= MAX_DETECTIONS {
            break;
        }
    }
    keep
}
