//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{self, Frame};
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::capture::Parameters;
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

/// Anything that can hand out frames one at a time.
pub trait CaptureDevice: Send {
    /// Block until the next frame is available.
    fn capture(&mut self) -> Result<Frame, CameraError>;
}

/// Pixel layouts the capture loop can turn into RGB frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel).
    Yuyv,
    /// Packed 24-bit RGB.
    Rgb24,
    /// Motion-JPEG, one JPEG image per buffer.
    Mjpeg,
}

impl PixelFormat {
    pub fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(Self::Yuyv),
            b"RGB3" => Some(Self::Rgb24),
            b"MJPG" => Some(Self::Mjpeg),
            _ => None,
        }
    }
}

fn open_error(device_path: &str, e: std::io::Error) -> CameraError {
    if e.raw_os_error() == Some(16) || e.to_string().contains("busy") {
        CameraError::DeviceBusy
    } else {
        CameraError::DeviceNotFound(format!("{device_path}: {e}"))
    }
}

/// V4L2 camera device handle with a persistent mmap stream.
pub struct Camera {
    device: Device,
    stream: Option<MmapStream<'static>>,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a V4L2 camera (e.g. "/dev/video0") and negotiate size and rate.
    pub fn open(device_path: &str, width: u32, height: u32, fps: u32) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| open_error(device_path, e))?;
        let caps = device
            .query_caps()
            .map_err(|e| CameraError::CaptureFailed(format!("capability query: {e}")))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }
        tracing::info!(device = device_path, driver = %caps.driver, card = %caps.card, "doorbell camera opened");

        // Ask for YUYV at the configured size; drivers may answer with RGB3 or MJPG.
        let requested = v4l::Format::new(width, height, FourCC::new(b"YUYV"));
        let negotiated = device
            .set_format(&requested)
            .map_err(|e| CameraError::FormatNegotiationFailed(e.to_string()))?;
        let fourcc = negotiated.fourcc;
        let pixel_format = PixelFormat::from_fourcc(fourcc).ok_or_else(|| {
            CameraError::FormatNegotiationFailed(format!("driver offered {fourcc}, need YUYV, RGB3 or MJPG"))
        })?;

        if fps > 0 {
            if let Err(e) = device.set_params(&Parameters::with_fps(fps)) {
                tracing::warn!(fps, error = %e, "camera rejected frame rate; using driver default");
            }
        }

        tracing::info!(width = negotiated.width, height = negotiated.height, %fourcc, "capture format set");

        Ok(Self {
            device,
            stream: None,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            fourcc,
            pixel_format,
        })
    }

    fn buf_to_frame(&self, buf: &[u8], sequence: u32) -> Result<Frame, CameraError> {
        let image = match self.pixel_format {
            PixelFormat::Yuyv => frame::yuyv_to_rgb(buf, self.width, self.height)
                .map_err(|e| CameraError::CaptureFailed(format!("YUYV conversion failed: {e}")))?,
            PixelFormat::Rgb24 => {
                let expected = (self.width * self.height * 3) as usize;
                if buf.len() < expected {
                    return Err(CameraError::CaptureFailed(format!(
                        "RGB3 buffer too short: expected {expected}, got {}",
                        buf.len()
                    )));
                }
                image::RgbImage::from_raw(self.width, self.height, buf[..expected].to_vec())
                    .ok_or_else(|| CameraError::CaptureFailed("RGB3 buffer rejected".into()))?
            }
            PixelFormat::Mjpeg => image::load_from_memory(buf)
                .map_err(|e| CameraError::CaptureFailed(format!("MJPG decode failed: {e}")))?
                .to_rgb8(),
        };
        Ok(Frame::new(image, sequence))
    }
}

impl CaptureDevice for Camera {
    fn capture(&mut self) -> Result<Frame, CameraError> {
        if self.stream.is_none() {
            let stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, 4)
                .map_err(|e| {
                    CameraError::CaptureFailed(format!("failed to create mmap stream: {e}"))
                })?;
            self.stream = Some(stream);
        }

        let (data, sequence) = {
            let Some(stream) = self.stream.as_mut() else {
                return Err(CameraError::CaptureFailed("stream not started".into()));
            };
            let (buf, meta) = stream.next().map_err(|e| {
                CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}"))
            })?;
            (buf.to_vec(), meta.sequence)
        };

        self.buf_to_frame(&data, sequence)
    }
}
