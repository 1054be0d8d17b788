//! Raw V4L2 buffer conversion to interleaved RGB, and dark-frame detection.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("buffer too short: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

fn clamp_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// BT.601 full-range YCbCr → RGB for one pixel.
fn ycbcr_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let y = y as f32;
    let cb = u as f32 - 128.0;
    let cr = v as f32 - 128.0;
    [
        clamp_u8(y + 1.402 * cr),
        clamp_u8(y - 0.344_136 * cb - 0.714_136 * cr),
        clamp_u8(y + 1.772 * cb),
    ]
}

/// Convert packed YUYV (4:2:2) to RGB.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]; both pixels share
/// the chroma pair.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, ConvertError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(ConvertError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for quad in yuyv[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (quad[0], quad[1], quad[2], quad[3]);
        rgb.extend_from_slice(&ycbcr_to_rgb(y0, u, v));
        rgb.extend_from_slice(&ycbcr_to_rgb(y1, u, v));
    }
    Ok(rgb)
}

/// Replicate 8-bit grayscale into three channels.
pub fn grey_to_rgb(grey: &[u8], width: u32, height: u32) -> Result<Vec<u8>, ConvertError> {
    let expected = (width * height) as usize;
    if grey.len() < expected {
        return Err(ConvertError::InvalidLength {
            expected,
            actual: grey.len(),
        });
    }
    Ok(grey[..expected].iter().flat_map(|&g| [g, g, g]).collect())
}

/// Copy a packed RGB24 buffer, checking its length.
pub fn rgb24(buf: &[u8], width: u32, height: u32) -> Result<Vec<u8>, ConvertError> {
    let expected = (width * height * 3) as usize;
    if buf.len() < expected {
        return Err(ConvertError::InvalidLength {
            expected,
            actual: buf.len(),
        });
    }
    Ok(buf[..expected].to_vec())
}

/// True if more than `threshold_pct` of RGB pixels are near black
/// (every channel below 32).
pub fn is_dark_frame(rgb: &[u8], threshold_pct: f32) -> bool {
    let pixels = rgb.len() / 3;
    if pixels == 0 {
        return true;
    }
    let dark = rgb
        .chunks_exact(3)
        .filter(|p| p.iter().all(|&c| c < 32))
        .count();
    (dark as f32 / pixels as f32) > threshold_pct
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_neutral_chroma_is_grey() {
        let yuyv = vec![100, 128, 200, 128];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        assert_eq!(rgb, vec![100, 100, 100, 200, 200, 200]);
    }

    #[test]
    fn test_yuyv_red_chroma() {
        // Pure red in BT.601 full range: Y=76, Cb=85, Cr=255.
        let rgb = yuyv_to_rgb(&[76, 85, 76, 255], 2, 1).unwrap();
        assert!(rgb[0] > 240, "red channel {}", rgb[0]);
        assert!(rgb[1] < 10, "green channel {}", rgb[1]);
        assert!(rgb[2] < 10, "blue channel {}", rgb[2]);
    }

    #[test]
    fn test_yuyv_too_short() {
        assert!(matches!(
            yuyv_to_rgb(&[0; 6], 2, 2),
            Err(ConvertError::InvalidLength { expected: 8, actual: 6 })
        ));
    }

    #[test]
    fn test_grey_to_rgb() {
        let rgb = grey_to_rgb(&[7, 9], 2, 1).unwrap();
        assert_eq!(rgb, vec![7, 7, 7, 9, 9, 9]);
    }

    #[test]
    fn test_is_dark_frame() {
        assert!(is_dark_frame(&[0; 300], 0.95));
        assert!(!is_dark_frame(&[128; 300], 0.95));
        assert!(is_dark_frame(&[], 0.95));
    }
}
