use anyhow::{anyhow, Result};

/// Pixel layouts a capture device may hand back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(not(feature = "ingest-v4l2"), allow(dead_code))]
pub(crate) enum PixelFormat {
    Bgr24,
    Rgb24,
    Yuyv,
}

impl PixelFormat {
    #[cfg_attr(not(feature = "ingest-v4l2"), allow(dead_code))]
    pub(crate) fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"BGR3" => Some(PixelFormat::Bgr24),
            b"RGB3" => Some(PixelFormat::Rgb24),
            b"YUYV" => Some(PixelFormat::Yuyv),
            _ => None,
        }
    }
}

/// Convert a device buffer into packed BGR of exactly `width * height * 3` bytes.
#[cfg_attr(not(feature = "ingest-v4l2"), allow(dead_code))]
pub(crate) fn normalize_to_bgr(
    pixels: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<Vec<u8>> {
    let pixel_count = (width as usize)
        .checked_mul(height as usize)
        .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
    match format {
        PixelFormat::Bgr24 => {
            let packed = take_exact(pixels, pixel_count * 3, "BGR")?;
            Ok(packed.to_vec())
        }
        PixelFormat::Rgb24 => {
            let packed = take_exact(pixels, pixel_count * 3, "RGB")?;
            let mut bgr = Vec::with_capacity(packed.len());
            for px in packed.chunks_exact(3) {
                bgr.extend_from_slice(&[px[2], px[1], px[0]]);
            }
            Ok(bgr)
        }
        PixelFormat::Yuyv => yuyv_to_bgr(pixels, width, height),
    }
}

/// Drivers may pad the mapped buffer; anything shorter than a frame is an error.
fn take_exact<'a>(pixels: &'a [u8], expected: usize, label: &str) -> Result<&'a [u8]> {
    pixels.get(..expected).ok_or_else(|| {
        anyhow!(
            "{} frame length mismatch: expected {}, got {}",
            label,
            expected,
            pixels.len()
        )
    })
}

fn yuyv_to_bgr(pixels: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    if width % 2 != 0 {
        return Err(anyhow!("YUYV frames need an even width, got {}", width));
    }
    let pixel_count = width as usize * height as usize;
    let packed = take_exact(pixels, pixel_count * 2, "YUYV")?;

    let mut bgr = Vec::with_capacity(pixel_count * 3);
    for quad in packed.chunks_exact(4) {
        let u = quad[1] as f32 - 128.0;
        let v = quad[3] as f32 - 128.0;
        for y in [quad[0], quad[2]] {
            let y = y as f32;
            let r = y + 1.402_f32 * v;
            let g = y - 0.344_136_f32 * u - 0.714_136_f32 * v;
            let b = y + 1.772_f32 * u;
            bgr.extend_from_slice(&[clamp_to_u8(b), clamp_to_u8(g), clamp_to_u8(r)]);
        }
    }
    Ok(bgr)
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yuyv_neutral_chroma_is_gray() -> Result<()> {
        let yuyv = vec![128u8, 128, 128, 128];
        let bgr = normalize_to_bgr(&yuyv, 2, 1, PixelFormat::Yuyv)?;
        assert_eq!(bgr, vec![128u8; 6]);
        Ok(())
    }

    #[test]
    fn rgb_is_swapped_to_bgr() -> Result<()> {
        let rgb = vec![1u8, 2, 3, 4, 5, 6];
        let bgr = normalize_to_bgr(&rgb, 2, 1, PixelFormat::Rgb24)?;
        assert_eq!(bgr, vec![3, 2, 1, 6, 5, 4]);
        Ok(())
    }

    #[test]
    fn padded_buffers_are_trimmed_and_short_ones_rejected() -> Result<()> {
        let padded = vec![7u8; 3 * 4 + 16];
        let bgr = normalize_to_bgr(&padded, 2, 2, PixelFormat::Bgr24)?;
        assert_eq!(bgr.len(), 12);
        assert!(normalize_to_bgr(&[0u8; 5], 2, 2, PixelFormat::Bgr24).is_err());
        Ok(())
    }

    #[test]
    fn fourcc_lookup() {
        assert_eq!(PixelFormat::from_fourcc(b"YUYV"), Some(PixelFormat::Yuyv));
        assert_eq!(PixelFormat::from_fourcc(b"MJPG"), None);
    }
}
