//! Input-tensor helpers shared by the crop-level ONNX backends.

use crate::frame::{Frame, CHANNELS};
use ndarray::Array4;
use ort::session::Session;

/// Memory layout of a 4-D image input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputLayout {
    /// [batch, channels, height, width]
    Nchw,
    /// [batch, height, width, channels]
    Nhwc,
}

/// Layout and spatial size a model expects for its first input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputGeometry {
    pub layout: InputLayout,
    pub width: u32,
    pub height: u32,
}

impl InputGeometry {
    /// Interpret a declared input shape. Dynamic (non-positive) dimensions and
    /// non-4-D shapes fall back to `default`.
    ///
    /// A 4-D shape whose second axis is 1 or 3 is read as NCHW, anything else
    /// as NHWC.
    pub fn from_shape(shape: &[i64], default: InputGeometry) -> Self {
        if shape.len() != 4 {
            return default;
        }
        let dim = |v: i64, fallback: u32| if v > 0 { v as u32 } else { fallback };
        if shape[1] == 1 || shape[1] == 3 {
            Self {
                layout: InputLayout::Nchw,
                height: dim(shape[2], default.height),
                width: dim(shape[3], default.width),
            }
        } else {
            Self {
                layout: InputLayout::Nhwc,
                height: dim(shape[1], default.height),
                width: dim(shape[2], default.width),
            }
        }
    }

    /// Read the geometry of the session's first input.
    pub fn discover(session: &Session, default: InputGeometry) -> Self {
        let shape: Option<Vec<i64>> = session
            .inputs()
            .first()
            .and_then(|input| input.dtype().tensor_shape())
            .map(|s| s.iter().copied().collect());
        match shape {
            Some(shape) => Self::from_shape(&shape, default),
            None => default,
        }
    }

    /// Resize `crop` to the input size and pack it with per-value `normalize`.
    pub fn tensor(&self, crop: &Frame, normalize: impl Fn(u8) -> f32) -> Array4<f32> {
        let resized = crop.resize(self.width, self.height);
        let (w, h) = (self.width as usize, self.height as usize);
        let mut tensor = match self.layout {
            InputLayout::Nchw => Array4::<f32>::zeros((1, CHANNELS, h, w)),
            InputLayout::Nhwc => Array4::<f32>::zeros((1, h, w, CHANNELS)),
        };

        for y in 0..h {
            for x in 0..w {
                for c in 0..CHANNELS {
                    let v = normalize(resized.data[(y * w + x) * CHANNELS + c]);
                    match self.layout {
                        InputLayout::Nchw => tensor[[0, c, y, x]] = v,
                        InputLayout::Nhwc => tensor[[0, y, x, c]] = v,
                    }
                }
            }
        }
        tensor
    }
}
