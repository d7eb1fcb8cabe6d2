//! Frame type and pixel conversion: YUYV to RGB, JPEG encoding, downscaling.

use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::RgbImage;
use std::sync::Arc;

/// A captured RGB camera frame.
///
/// Pixel data sits behind an `Arc` and is never mutated after capture;
/// cloning a frame to hand it to another stage shares the same buffer.
#[derive(Clone)]
pub struct Frame {
    pub image: Arc<RgbImage>,
    /// Wall-clock capture time, reported to the backend.
    pub captured_at: DateTime<Utc>,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
}

impl Frame {
    pub fn new(image: RgbImage, sequence: u32) -> Self {
        Self {
            image: Arc::new(image),
            captured_at: Utc::now(),
            timestamp: std::time::Instant::now(),
            sequence,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Encode the full frame as JPEG.
    pub fn to_jpeg(&self, quality: u8) -> Result<Vec<u8>, FrameError> {
        encode_jpeg(&self.image, quality)
    }

    /// Encode a copy scaled down to at most `max_width` pixels wide.
    pub fn to_jpeg_scaled(&self, max_width: u32, quality: u8) -> Result<Vec<u8>, FrameError> {
        if max_width == 0 || self.width() <= max_width {
            return self.to_jpeg(quality);
        }
        let height = ((self.height() as u64 * max_width as u64) / self.width() as u64).max(1) as u32;
        let scaled = imageops::resize(self.image.as_ref(), max_width, height, FilterType::Triangle);
        encode_jpeg(&scaled, quality)
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("sequence", &self.sequence)
            .field("captured_at", &self.captured_at)
            .finish()
    }
}

/// Encode any RGB image as JPEG at `quality` (1-100).
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, FrameError> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
        .encode_image(image)
        .map_err(|e| FrameError::Encode(e.to_string()))?;
    Ok(out)
}

/// Convert packed YUYV (4:2:2) to RGB using BT.601 coefficients.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]; both pixels share U/V.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for chunk in yuyv[..expected].chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for y in [chunk[0], chunk[2]] {
            let y = y as f32;
            rgb.push((y + 1.402 * v).round().clamp(0.0, 255.0) as u8);
            rgb.push((y - 0.344_136 * u - 0.714_136 * v).round().clamp(0.0, 255.0) as u8);
            rgb.push((y + 1.772 * u).round().clamp(0.0, 255.0) as u8);
        }
    }

    RgbImage::from_raw(width, height, rgb).ok_or(FrameError::InvalidLength {
        expected,
        actual: yuyv.len(),
    })
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("JPEG encoding failed: {0}")]
    Encode(String),
    #[error("JPEG decoding failed: {0}")]
    Decode(String),
}
