//! HTTP client for the out-of-process face detection / embedding service.
//!
//! Runs on the engine thread, so it uses reqwest's blocking client. The
//! client is built on first use: a blocking client must not be created or
//! dropped from inside the async runtime.

use doorward_core::{Detection, Vision, VisionError};
use image::RgbImage;
use serde::Deserialize;
use std::time::Duration;

const JPEG_QUALITY: u8 = 90;

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

pub struct RemoteVision {
    base_url: String,
    timeout: Duration,
    client: Option<reqwest::blocking::Client>,
}

impl RemoteVision {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
            client: None,
        }
    }

    fn client(&mut self) -> Result<&reqwest::blocking::Client, VisionError> {
        if self.client.is_none() {
            let client = reqwest::blocking::Client::builder()
                .timeout(self.timeout)
                .build()
                .map_err(|e| VisionError::Unavailable(e.to_string()))?;
            self.client = Some(client);
        }
        self.client
            .as_ref()
            .ok_or_else(|| VisionError::Unavailable("client not initialised".into()))
    }

    fn post<T: for<'de> Deserialize<'de>>(&mut self, path: &str, image: &RgbImage) -> Result<T, VisionError> {
        let body = doorward_hw::encode_jpeg(image, JPEG_QUALITY)
            .map_err(|e| VisionError::InvalidCrop(e.to_string()))?;
        let url = format!("{}{path}", self.base_url);

        let response = self
            .client()?
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "image/jpeg")
            .body(body)
            .send()
            .map_err(|e| VisionError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(VisionError::InferenceFailed(format!("{path} returned {status}")));
        }
        response
            .json::<T>()
            .map_err(|e| VisionError::InferenceFailed(format!("{path}: {e}")))
    }
}

impl Vision for RemoteVision {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>, VisionError> {
        let detections: Vec<Detection> = self.post("/detect", image)?;
        tracing::debug!(count = detections.len(), "faces detected");
        Ok(detections)
    }

    fn embed(&mut self, face: &RgbImage) -> Result<Vec<f32>, VisionError> {
        if face.width() == 0 || face.height() == 0 {
            return Err(VisionError::InvalidCrop("empty crop".into()));
        }
        let response: EmbedResponse = self.post("/embed", face)?;
        if response.embedding.is_empty() {
            return Err(VisionError::InferenceFailed("empty embedding".into()));
        }
        Ok(response.embedding)
    }
}
