use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use crate::annotate::font;
use crate::frame::Frame;

/// Pure green; identical in BGR and RGB channel order.
pub const GREEN: [u8; 3] = [0, 255, 0];

/// A labelled box in frame pixel coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct OverlayBox {
    pub bbox: [f32; 4],
    pub label: String,
    /// BGR colour.
    pub color: [u8; 3],
}

/// A text line whose baseline-left corner sits at `origin`.
#[derive(Clone, Debug, PartialEq)]
pub struct OverlayText {
    pub origin: (i32, i32),
    pub text: String,
    pub color: [u8; 3],
    pub scale: u32,
}

/// Everything drawn onto one frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Overlay {
    pub boxes: Vec<OverlayBox>,
    pub texts: Vec<OverlayText>,
}

/// Draws an overlay onto a frame, producing a new frame of the same size.
pub trait Renderer: Send {
    fn render(&mut self, frame: &Frame, overlay: &Overlay) -> Result<Frame>;
}

impl<R: Renderer + ?Sized> Renderer for Box<R> {
    fn render(&mut self, frame: &Frame, overlay: &Overlay) -> Result<Frame> {
        (**self).render(frame, overlay)
    }
}

/// CPU renderer: 1px hollow boxes via `imageproc`, text via the built-in font.
///
/// Pixels are drawn straight into the BGR buffer; colours are given in BGR too, so
/// no channel swap is needed.
#[derive(Clone, Debug)]
pub struct RasterRenderer {
    label_scale: u32,
}

impl RasterRenderer {
    pub fn new() -> Self {
        Self { label_scale: 1 }
    }

    pub fn with_label_scale(mut self, scale: u32) -> Self {
        self.label_scale = scale.max(1);
        self
    }
}

impl Default for RasterRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for RasterRenderer {
    fn render(&mut self, frame: &Frame, overlay: &Overlay) -> Result<Frame> {
        let (width, height) = (frame.width(), frame.height());
        let mut canvas = RgbImage::from_raw(width, height, frame.as_bytes().to_vec())
            .ok_or_else(|| anyhow!("frame buffer does not match {}x{}", width, height))?;

        for item in &overlay.boxes {
            let Some(rect) = box_rect(item.bbox, width, height) else {
                continue;
            };
            draw_hollow_rect_mut(&mut canvas, rect, Rgb(item.color));
            if !item.label.is_empty() {
                let baseline = (rect.top() - 2).max((font::GLYPH_HEIGHT * self.label_scale) as i32);
                draw_text(&mut canvas, &item.label, (rect.left(), baseline), item.color, self.label_scale);
            }
        }

        for text in &overlay.texts {
            draw_text(&mut canvas, &text.text, text.origin, text.color, text.scale);
        }

        frame
            .with_pixels(canvas.into_raw(), width, height)
            .map_err(anyhow::Error::from)
    }
}

/// Clip a corner box to the canvas. `None` when nothing of it is visible.
fn box_rect(bbox: [f32; 4], width: u32, height: u32) -> Option<Rect> {
    if bbox.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let max_x = width.saturating_sub(1) as f32;
    let max_y = height.saturating_sub(1) as f32;
    let x1 = bbox[0].min(bbox[2]).clamp(0.0, max_x).round() as i32;
    let y1 = bbox[1].min(bbox[3]).clamp(0.0, max_y).round() as i32;
    let x2 = bbox[0].max(bbox[2]).clamp(0.0, max_x).round() as i32;
    let y2 = bbox[1].max(bbox[3]).clamp(0.0, max_y).round() as i32;
    let w = (x2 - x1 + 1) as u32;
    let h = (y2 - y1 + 1) as u32;
    // Rect::of_size panics on zero; the +1 above keeps both sides >= 1.
    Some(Rect::at(x1, y1).of_size(w, h))
}

fn draw_text(canvas: &mut RgbImage, text: &str, origin: (i32, i32), color: [u8; 3], scale: u32) {
    let scale = scale.max(1);
    let top = origin.1 as i64 - (font::GLYPH_HEIGHT * scale) as i64;
    let (width, height) = (canvas.width() as i64, canvas.height() as i64);
    font::rasterize(text, origin.0 as i64, top, scale, |x, y| {
        if x >= 0 && y >= 0 && x < width && y < height {
            canvas.put_pixel(x as u32, y as u32, Rgb(color));
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameGeometry;

    #[test]
    fn draws_one_pixel_box_outline() -> Result<()> {
        let geometry = FrameGeometry::new(32, 32)?;
        let frame = Frame::solid(geometry, 3, [0, 0, 0]);
        let overlay = Overlay {
            boxes: vec![OverlayBox {
                bbox: [4.0, 10.0, 20.0, 24.0],
                label: String::new(),
                color: GREEN,
            }],
            texts: Vec::new(),
        };
        let out = RasterRenderer::new().render(&frame, &overlay)?;
        assert_eq!(out.sequence(), 3);
        assert_eq!(out.pixel(4, 10), Some(GREEN));
        assert_eq!(out.pixel(20, 24), Some(GREEN));
        assert_eq!(out.pixel(12, 10), Some(GREEN));
        // Interior and outside untouched.
        assert_eq!(out.pixel(12, 17), Some([0, 0, 0]));
        assert_eq!(out.pixel(3, 10), Some([0, 0, 0]));
        Ok(())
    }

    #[test]
    fn degenerate_and_offscreen_boxes_do_not_panic() -> Result<()> {
        let geometry = FrameGeometry::new(8, 8)?;
        let frame = Frame::solid(geometry, 1, [9, 9, 9]);
        let overlay = Overlay {
            boxes: vec![
                OverlayBox { bbox: [5.0, 5.0, 5.0, 5.0], label: "dot".into(), color: GREEN },
                OverlayBox { bbox: [-50.0, -50.0, 500.0, 500.0], label: "big".into(), color: GREEN },
                OverlayBox { bbox: [f32::NAN, 0.0, 1.0, 1.0], label: String::new(), color: GREEN },
            ],
            texts: vec![OverlayText {
                origin: (100, 100),
                text: "offscreen".into(),
                color: GREEN,
                scale: 2,
            }],
        };
        let out = RasterRenderer::new().render(&frame, &overlay)?;
        assert_eq!(out.geometry(), geometry);
        assert_eq!(out.pixel(0, 0), Some(GREEN));
        Ok(())
    }

    #[test]
    fn text_is_drawn_above_baseline() -> Result<()> {
        let geometry = FrameGeometry::new(64, 64)?;
        let frame = Frame::solid(geometry, 1, [0, 0, 0]);
        let overlay = Overlay {
            boxes: Vec::new(),
            texts: vec![OverlayText {
                origin: (10, 50),
                text: "L".into(),
                color: GREEN,
                scale: 1,
            }],
        };
        let out = RasterRenderer::new().render(&frame, &overlay)?;
        // 'L' has its left column lit on every row and a full bottom row.
        assert_eq!(out.pixel(10, 43), Some(GREEN));
        assert_eq!(out.pixel(14, 49), Some(GREEN));
        assert_eq!(out.pixel(10, 50), Some([0, 0, 0]));
        Ok(())
    }
}
