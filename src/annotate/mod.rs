//! Frame annotation: detection boxes, labels, and the model performance line.

pub mod font;
mod metrics;
mod render;

pub use metrics::{fps_from_timing, overlay_text, FpsEstimate};
pub use render::{Overlay, OverlayBox, OverlayText, RasterRenderer, Renderer, GREEN};

use crate::detect::{Detection, StageTiming};
use crate::error::{PipelineError, PipelineResult};
use crate::frame::Frame;

/// Baseline-left corner of the performance line.
pub const METRICS_ORIGIN: (i32, i32) = (10, 50);
const METRICS_SCALE: u32 = 2;

/// Turns detections and timings into an overlay and renders it.
pub struct Annotator<R: Renderer> {
    renderer: R,
}

impl<R: Renderer> Annotator<R> {
    pub fn new(renderer: R) -> Self {
        Self { renderer }
    }

    /// Overlay for one frame. Labels read `"{name} {confidence:.2}"`.
    pub fn overlay(detections: &[Detection], timing: &StageTiming) -> Overlay {
        let boxes = detections
            .iter()
            .map(|det| OverlayBox {
                bbox: det.bbox,
                label: format!("{} {:.2}", det.label, det.confidence),
                color: GREEN,
            })
            .collect();
        Overlay {
            boxes,
            texts: vec![OverlayText {
                origin: METRICS_ORIGIN,
                text: overlay_text(timing),
                color: GREEN,
                scale: METRICS_SCALE,
            }],
        }
    }

    /// Render the annotated frame. The result always has the input's dimensions.
    pub fn annotate(&mut self, frame: &Frame, detections: &[Detection], timing: &StageTiming) -> PipelineResult<Frame> {
        let overlay = Self::overlay(detections, timing);
        let rendered = self
            .renderer
            .render(frame, &overlay)
            .map_err(|source| PipelineError::AnnotationFailure {
                frame: frame.sequence(),
                source,
            })?;
        if rendered.geometry() != frame.geometry() {
            return Err(PipelineError::AnnotationFailure {
                frame: frame.sequence(),
                source: anyhow::anyhow!(
                    "renderer changed frame size from {} to {}",
                    frame.geometry(),
                    rendered.geometry()
                ),
            });
        }
        Ok(rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameGeometry;

    struct ShrinkingRenderer;

    impl Renderer for ShrinkingRenderer {
        fn render(&mut self, frame: &Frame, _overlay: &Overlay) -> anyhow::Result<Frame> {
            let geometry = FrameGeometry::new(2, 2)?;
            Ok(Frame::solid(geometry, frame.sequence(), [0, 0, 0]))
        }
    }

    #[test]
    fn annotate_preserves_dimensions() -> PipelineResult<()> {
        let mut annotator = Annotator::new(RasterRenderer::new());
        let detections = vec![Detection::new([10.0, 60.0, 120.0, 200.0], 0, "person", 0.87)];
        for (w, h) in [(640, 480), (320, 240), (16, 16)] {
            let frame = Frame::solid(FrameGeometry::new(w, h)?, 1, [40, 40, 40]);
            let out = annotator.annotate(&frame, &detections, &StageTiming::from_millis(5.0, 15.0, 2.0))?;
            assert_eq!(out.geometry(), frame.geometry());
            assert_eq!(out.as_bytes().len(), (w * h * 3) as usize);
        }
        Ok(())
    }

    #[test]
    fn overlay_uses_detection_labels() {
        let detections = vec![Detection::new([0.0, 0.0, 4.0, 4.0], 2, "car", 0.5)];
        let overlay = Annotator::<RasterRenderer>::overlay(&detections, &StageTiming::default());
        assert_eq!(overlay.boxes[0].label, "car 0.50");
        assert_eq!(overlay.texts[0].text, "FPS: --, Pr: 0.00ms, In: 0.00ms, Post: 0.00ms");
        assert_eq!(overlay.texts[0].origin, (10, 50));
    }

    #[test]
    fn renderer_resizing_is_an_annotation_failure() -> PipelineResult<()> {
        let mut annotator = Annotator::new(ShrinkingRenderer);
        let frame = Frame::solid(FrameGeometry::new(8, 8)?, 4, [0, 0, 0]);
        let err = annotator
            .annotate(&frame, &[], &StageTiming::default())
            .expect_err("size change must fail");
        assert!(matches!(err, PipelineError::AnnotationFailure { frame: 4, .. }));
        Ok(())
    }
}
