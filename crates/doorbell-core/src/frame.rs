//! RGB frame type plus cropping, grayscale conversion and Laplacian
//! sharpness.

use crate::types::FaceRegion;
use image::RgbImage;
use thiserror::Error;

/// Bytes per pixel of the interleaved RGB layout.
pub const CHANNELS: usize = 3;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("invalid RGB length for {width}x{height}: expected {expected}, got {actual}")]
    InvalidLength {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
    #[error("image decode failed: {0}")]
    Decode(#[from] image::ImageError),
}

/// A captured camera frame in interleaved 8-bit RGB order.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// RGB pixel data (width * height * 3 bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    /// Wrap raw RGB bytes, checking the length matches the dimensions.
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize * CHANNELS;
        if data.len() != expected {
            return Err(FrameError::InvalidLength {
                width,
                height,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    /// Uniformly filled frame; mostly useful for tests and warmup.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let pixels = width as usize * height as usize;
        let mut data = Vec::with_capacity(pixels * CHANNELS);
        for _ in 0..pixels {
            data.extend_from_slice(&rgb);
        }
        Self {
            data,
            width,
            height,
        }
    }

    /// Decode an image file (any format the `image` crate understands) into RGB.
    pub fn open(path: &std::path::Path) -> Result<Self, FrameError> {
        let img = image::open(path)?.to_rgb8();
        Ok(Self::from(img))
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Area in pixels.
    pub fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let idx = (y as usize * self.width as usize + x as usize) * CHANNELS;
        [self.data[idx], self.data[idx + 1], self.data[idx + 2]]
    }

    /// Copy out the pixels covered by `region`, clipped to the frame bounds.
    ///
    /// A region entirely outside the frame yields an empty (0×0) frame.
    pub fn crop(&self, region: &FaceRegion) -> Frame {
        let x0 = region.x.min(self.width);
        let y0 = region.y.min(self.height);
        let x1 = region.x.saturating_add(region.width).min(self.width);
        let y1 = region.y.saturating_add(region.height).min(self.height);
        let w = x1.saturating_sub(x0);
        let h = y1.saturating_sub(y0);

        let mut data = Vec::with_capacity(w as usize * h as usize * CHANNELS);
        let stride = self.width as usize * CHANNELS;
        for y in y0..y1 {
            let start = y as usize * stride + x0 as usize * CHANNELS;
            let end = start + w as usize * CHANNELS;
            data.extend_from_slice(&self.data[start..end]);
        }

        Frame {
            data,
            width: w,
            height: h,
        }
    }

    /// Luma conversion with the ITU-R BT.601 weights.
    pub fn to_grayscale(&self) -> Vec<u8> {
        self.data
            .chunks_exact(CHANNELS)
            .map(|px| {
                let y = 0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32;
                y.round().clamp(0.0, 255.0) as u8
            })
            .collect()
    }

    /// Resize with bilinear filtering, as the inference backends expect.
    pub fn resize(&self, width: u32, height: u32) -> Frame {
        if self.is_empty() {
            return Frame::filled(width, height, [0, 0, 0]);
        }
        let img = match RgbImage::from_raw(self.width, self.height, self.data.clone()) {
            Some(img) => img,
            None => return Frame::filled(width, height, [0, 0, 0]),
        };
        let resized =
            image::imageops::resize(&img, width, height, image::imageops::FilterType::Triangle);
        Frame::from(resized)
    }
}

impl From<RgbImage> for Frame {
    fn from(img: RgbImage) -> Self {
        let (width, height) = img.dimensions();
        Self {
            data: img.into_raw(),
            width,
            height,
        }
    }
}

/// Reflect-101 border index (`dcb|abcd|cba`), the usual convolution border.
fn reflect_101(i: isize, n: usize) -> usize {
    if n == 1 {
        return 0;
    }
    let n = n as isize;
    let mut i = i;
    if i < 0 {
        i = -i;
    }
    if i >= n {
        i = 2 * n - 2 - i;
    }
    i.clamp(0, n - 1) as usize
}

/// Variance of the 4-neighbour Laplacian response over a grayscale image.
///
/// Higher variance means more high-frequency detail; flat or blurred regions
/// (a printed photo held too close, motion blur) score low. Returns 0.0 for an
/// empty image.
pub fn laplacian_variance(gray: &[u8], width: usize, height: usize) -> f64 {
    if width == 0 || height == 0 || gray.len() < width * height {
        return 0.0;
    }

    let at = |x: isize, y: isize| -> f64 {
        let xi = reflect_101(x, width);
        let yi = reflect_101(y, height);
        gray[yi * width + xi] as f64
    };

    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    for y in 0..height as isize {
        for x in 0..width as isize {
            let lap = at(x, y - 1) + at(x - 1, y) + at(x + 1, y) + at(x, y + 1) - 4.0 * at(x, y);
            sum += lap;
            sum_sq += lap * lap;
        }
    }

    let n = (width * height) as f64;
    let mean = sum / n;
    (sum_sq / n - mean * mean).max(0.0)
}
