//! Recognition gateway: frame in, verdict out.
//!
//! Calls the external detector, crops each face with a margin, embeds it,
//! and matches the probe against the current gallery snapshot. Failures
//! inside the vision capability never escape; an individual face that
//! cannot be processed is simply skipped.

use crate::gallery::GalleryStore;
use crate::types::{CosineMatcher, Detection, Embedding, Matcher, RecognitionResult};
use crate::vision::Vision;
use image::imageops::{self, FilterType};
use image::RgbImage;
use std::sync::Arc;

const DEFAULT_CROP_MARGIN: f32 = 0.25;
const DEFAULT_MIN_FACE_PX: u32 = 30;
/// Side length of the square crop handed to the embedder.
pub const EMBED_INPUT_SIZE: u32 = 160;

#[derive(Debug, Clone, Copy)]
pub struct GatewayConfig {
    /// Similarity must be strictly greater than this to count as a match.
    pub threshold: f32,
    /// Fraction of the box extent added on every side before cropping.
    pub crop_margin: f32,
    /// Crops smaller than this (either side, after clamping) are treated as noise.
    pub min_face_px: u32,
}

impl GatewayConfig {
    pub fn with_threshold(threshold: f32) -> Self {
        Self {
            threshold,
            crop_margin: DEFAULT_CROP_MARGIN,
            min_face_px: DEFAULT_MIN_FACE_PX,
        }
    }
}

/// Stateless adapter between a [`Vision`] implementation and the gallery.
pub struct RecognitionGateway<V: Vision> {
    vision: V,
    gallery: Arc<GalleryStore>,
    config: GatewayConfig,
}

impl<V: Vision> RecognitionGateway<V> {
    pub fn new(vision: V, gallery: Arc<GalleryStore>, config: GatewayConfig) -> Self {
        Self {
            vision,
            gallery,
            config,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Run detection + matching over one frame.
    pub fn recognize(&mut self, image: &RgbImage) -> RecognitionResult {
        let detections = match self.vision.detect(image) {
            Ok(d) => d,
            Err(e) => {
                tracing::error!(error = %e, "face detection failed");
                return RecognitionResult::no_match(0);
            }
        };

        if detections.is_empty() {
            return RecognitionResult::no_faces();
        }

        let faces = detections.len();
        let gallery = self.gallery.snapshot();
        let mut best: Option<(usize, f32)> = None;

        for (i, det) in detections.iter().enumerate() {
            let Some(crop) = crop_face(image, det, self.config.crop_margin, self.config.min_face_px)
            else {
                tracing::debug!(face = i, ?det, "face crop too small, skipping");
                continue;
            };

            let probe = match self.vision.embed(&crop) {
                Ok(values) => Embedding::new(values).l2_normalized(),
                Err(e) => {
                    tracing::error!(face = i, error = %e, "embedding extraction failed");
                    continue;
                }
            };

            let result = CosineMatcher.compare(&probe, &gallery, self.config.threshold);
            tracing::debug!(face = i, similarity = result.similarity, matched = result.matched, "face compared");

            if let (true, Some(idx)) = (result.matched, result.index) {
                let better = best.map_or(true, |(_, sim)| result.similarity > sim);
                if better {
                    best = Some((idx, result.similarity));
                }
            }
        }

        match best {
            Some((idx, similarity)) => {
                RecognitionResult::matched(gallery[idx].person_name.clone(), similarity, faces)
            }
            None => RecognitionResult::no_match(faces),
        }
    }
}

/// Crop a detected face with `margin` of its extent on every side, clamped to
/// the frame, and resize it to the embedder's input size.
///
/// Returns `None` when the clamped region is smaller than `min_px` on either side.
pub fn crop_face(image: &RgbImage, det: &Detection, margin: f32, min_px: u32) -> Option<RgbImage> {
    let (w, h) = (image.width() as f32, image.height() as f32);
    let dx = det.width() * margin;
    let dy = det.height() * margin;

    let x1 = (det.x1 - dx).clamp(0.0, w).floor() as u32;
    let y1 = (det.y1 - dy).clamp(0.0, h).floor() as u32;
    let x2 = (det.x2 + dx).clamp(0.0, w).ceil() as u32;
    let y2 = (det.y2 + dy).clamp(0.0, h).ceil() as u32;

    let cw = x2.saturating_sub(x1);
    let ch = y2.saturating_sub(y1);
    if cw < min_px || ch < min_px {
        return None;
    }

    let region = imageops::crop_imm(image, x1, y1, cw, ch).to_image();
    Some(imageops::resize(&region, EMBED_INPUT_SIZE, EMBED_INPUT_SIZE, FilterType::Triangle))
}
