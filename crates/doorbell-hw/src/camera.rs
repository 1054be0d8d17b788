//! V4L2 camera capture via the `v4l` crate.

use crate::frame;
use doorbell_core::{Frame, FrameSource};
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel).
    Yuyv,
    /// Packed 24-bit RGB.
    Rgb24,
    /// 8-bit grayscale, replicated to three channels.
    Grey,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        if fourcc == FourCC::new(b"YUYV") {
            Some(PixelFormat::Yuyv)
        } else if fourcc == FourCC::new(b"RGB3") {
            Some(PixelFormat::Rgb24)
        } else if fourcc == FourCC::new(b"GREY") {
            Some(PixelFormat::Grey)
        } else {
            None
        }
    }
}

/// V4L2 camera device handle.
pub struct Camera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
    /// Serializes captures from concurrent callers.
    capture_lock: Mutex<()>,
}

impl Camera {
    /// Open a V4L2 camera device and request `width`×`height` YUYV.
    pub fn open(device_path: &str, width: u32, height: u32) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = width;
        fmt.height = height;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let fourcc = negotiated.fourcc;
        let pixel_format = PixelFormat::from_fourcc(fourcc).ok_or_else(|| {
            CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {fourcc:?} (need YUYV, RGB3, or GREY)"
            ))
        })?;

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?fourcc,
            "negotiated format"
        );

        Ok(Self {
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            fourcc,
            pixel_format,
            capture_lock: Mutex::new(()),
        })
    }

    /// Capture a single frame as RGB.
    pub fn capture_frame(&self) -> Result<Frame, CameraError> {
        let _guard = self.capture_lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut stream =
            MmapStream::with_buffers(&self.device, BufType::VideoCapture, 4).map_err(|e| {
                CameraError::CaptureFailed(format!("failed to create mmap stream: {e}"))
            })?;

        let (buf, meta) = stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;

        let rgb = self.buf_to_rgb(buf)?;
        tracing::trace!(seq = meta.sequence, bytes = buf.len(), "frame captured");

        Frame::new(rgb, self.width, self.height)
            .map_err(|e| CameraError::CaptureFailed(e.to_string()))
    }

    fn buf_to_rgb(&self, buf: &[u8]) -> Result<Vec<u8>, CameraError> {
        let converted = match self.pixel_format {
            PixelFormat::Yuyv => frame::yuyv_to_rgb(buf, self.width, self.height),
            PixelFormat::Rgb24 => frame::rgb24(buf, self.width, self.height),
            PixelFormat::Grey => frame::grey_to_rgb(buf, self.width, self.height),
        };
        converted.map_err(|e| {
            CameraError::CaptureFailed(format!("{:?} conversion failed: {e}", self.pixel_format))
        })
    }

    /// Discard `count` frames so auto-exposure can settle.
    pub fn warmup(&self, count: usize) {
        let mut dark = 0usize;
        for _ in 0..count {
            match self.capture_frame() {
                Ok(f) if frame::is_dark_frame(&f.data, 0.95) => dark += 1,
                Ok(_) => {}
                Err(e) => tracing::debug!(error = %e, "warmup capture failed"),
            }
        }
        tracing::info!(count, dark, "discarded warmup frames");
    }
}

impl FrameSource for Camera {
    fn capture(&self) -> Option<Frame> {
        match self.capture_frame() {
            Ok(frame) => Some(frame),
            Err(e) => {
                tracing::warn!(device = %self.device_path, error = %e, "frame capture failed");
                None
            }
        }
    }
}

/// Frame source used when no camera could be opened. Every capture is `None`.
pub struct NoCamera;

impl FrameSource for NoCamera {
    fn capture(&self) -> Option<Frame> {
        tracing::debug!("no camera available");
        None
    }
}
