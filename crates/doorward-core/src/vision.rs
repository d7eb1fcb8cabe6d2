//! Contract for the external face detection / embedding capability.

use crate::types::Detection;
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("vision service unavailable: {0}")]
    Unavailable(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("invalid face crop: {0}")]
    InvalidCrop(String),
}

/// Face detection and embedding extraction.
///
/// Implementations may block for the duration of one inference call; the
/// daemon keeps them on a dedicated thread.
pub trait Vision: Send {
    /// Detect faces in a full frame, returning zero or more boxes.
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>, VisionError>;

    /// Extract an embedding from a cropped face.
    fn embed(&mut self, face: &RgbImage) -> Result<Vec<f32>, VisionError>;
}
