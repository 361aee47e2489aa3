//! Frame buffers flowing through the pipeline.
//!
//! - `FrameGeometry`: configured width/height, fixed for a run.
//! - `Frame`: owned packed-BGR pixel buffer tagged with its capture sequence.
//!
//! A `Frame` can only be built with exactly `width * height * 3` bytes, so every
//! stage downstream of construction may rely on the length invariant.

use std::time::Instant;

use crate::error::{PipelineError, PipelineResult};

/// Bytes per packed BGR pixel.
pub const BYTES_PER_PIXEL: usize = 3;

// ----------------------------------------------------------------------------
// FrameGeometry
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameGeometry {
    pub width: u32,
    pub height: u32,
}

impl FrameGeometry {
    pub fn new(width: u32, height: u32) -> PipelineResult<Self> {
        let geometry = Self { width, height };
        geometry.checked_byte_len()?;
        Ok(geometry)
    }

    /// Byte length of one frame. Overflow is rejected by `new`.
    pub fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * BYTES_PER_PIXEL
    }

    fn checked_byte_len(&self) -> PipelineResult<usize> {
        if self.width == 0 || self.height == 0 {
            return Err(PipelineError::Config(format!(
                "frame geometry {}x{} must be non-zero",
                self.width, self.height
            )));
        }
        (self.width as usize)
            .checked_mul(self.height as usize)
            .and_then(|v| v.checked_mul(BYTES_PER_PIXEL))
            .ok_or_else(|| {
                PipelineError::Config(format!(
                    "frame geometry {}x{} overflows",
                    self.width, self.height
                ))
            })
    }

    /// Reject a frame whose dimensions differ from this geometry.
    pub fn check(&self, frame: &Frame) -> PipelineResult<()> {
        if frame.width == self.width && frame.height == self.height {
            return Ok(());
        }
        Err(PipelineError::InvalidFrame {
            width: self.width,
            height: self.height,
            expected: self.byte_len(),
            actual: frame.data.len(),
        })
    }
}

impl std::fmt::Display for FrameGeometry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// Packed BGR frame. Not `Clone`: each frame has exactly one owner at a time.
#[derive(Debug)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    sequence: u64,
    captured_at: Instant,
}

impl Frame {
    /// Build a frame, validating `data.len() == width * height * 3`.
    pub fn new(data: Vec<u8>, width: u32, height: u32, sequence: u64) -> PipelineResult<Self> {
        let geometry = FrameGeometry::new(width, height)?;
        if data.len() != geometry.byte_len() {
            return Err(PipelineError::InvalidFrame {
                width,
                height,
                expected: geometry.byte_len(),
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            sequence,
            captured_at: Instant::now(),
        })
    }

    /// Frame filled with a single BGR colour.
    pub fn solid(geometry: FrameGeometry, sequence: u64, bgr: [u8; 3]) -> Self {
        let data = bgr
            .iter()
            .copied()
            .cycle()
            .take(geometry.byte_len())
            .collect();
        Self {
            data,
            width: geometry.width,
            height: geometry.height,
            sequence,
            captured_at: Instant::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn geometry(&self) -> FrameGeometry {
        FrameGeometry {
            width: self.width,
            height: self.height,
        }
    }

    /// Capture order, starting at 1 for each source.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    /// Raw bytes in packed BGR order, row-major, no padding.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Give up the buffer, e.g. to hand it to an image library.
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Rebuild a frame from a rendered buffer, keeping sequence and capture time.
    pub fn with_pixels(&self, data: Vec<u8>, width: u32, height: u32) -> PipelineResult<Self> {
        let mut frame = Frame::new(data, width, height, self.sequence)?;
        frame.captured_at = self.captured_at;
        Ok(frame)
    }

    /// Pixel at (x, y) as BGR. Returns `None` outside the frame.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * BYTES_PER_PIXEL;
        Some([
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
        ])
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_length_matches_geometry() {
        for (w, h) in [(1, 1), (2, 2), (320, 240), (640, 480), (1280, 720), (7, 3)] {
            let geometry = FrameGeometry::new(w, h).unwrap();
            let frame = Frame::solid(geometry, 1, [1, 2, 3]);
            assert_eq!(frame.as_bytes().len(), (w * h * 3) as usize);
            assert_eq!(geometry.byte_len(), (w * h * 3) as usize);
        }
    }

    #[test]
    fn frame_rejects_wrong_length() {
        let err = Frame::new(vec![0u8; 10], 2, 2, 1).unwrap_err();
        match err {
            PipelineError::InvalidFrame {
                expected, actual, ..
            } => {
                assert_eq!(expected, 12);
                assert_eq!(actual, 10);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn zero_geometry_is_rejected() {
        assert!(FrameGeometry::new(0, 480).is_err());
        assert!(FrameGeometry::new(640, 0).is_err());
    }

    #[test]
    fn solid_frame_is_bgr_ordered() {
        let geometry = FrameGeometry::new(4, 2).unwrap();
        let frame = Frame::solid(geometry, 9, [10, 20, 30]);
        assert_eq!(frame.pixel(3, 1), Some([10, 20, 30]));
        assert_eq!(frame.pixel(4, 0), None);
        assert_eq!(frame.sequence(), 9);
    }

    #[test]
    fn geometry_check_flags_mismatch() {
        let expected = FrameGeometry::new(640, 480).unwrap();
        let other = Frame::solid(FrameGeometry::new(320, 240).unwrap(), 1, [0, 0, 0]);
        assert!(expected.check(&other).is_err());
        let same = Frame::solid(expected, 1, [0, 0, 0]);
        assert!(expected.check(&same).is_ok());
    }

    #[test]
    fn with_pixels_keeps_sequence() {
        let geometry = FrameGeometry::new(2, 1).unwrap();
        let frame = Frame::solid(geometry, 42, [0, 0, 0]);
        let rebuilt = frame.with_pixels(vec![255; 6], 2, 1).unwrap();
        assert_eq!(rebuilt.sequence(), 42);
        assert_eq!(rebuilt.captured_at(), frame.captured_at());
        assert!(frame.with_pixels(vec![0; 5], 2, 1).is_err());
    }
}
