//! Notification & upload pipeline.
//!
//! Producers enqueue [`NotificationEvent`]s and move on. A single worker
//! drains the queue: it uploads the captured frame (if any) to obtain an
//! image URL, then posts the notification. Delivery is best effort: an
//! upload failure degrades to a notification without an image, and a
//! failed post is logged and dropped.

use crate::backend::{Backend, BackendError, CaptureUpload, DeviceNotification};
use crate::queue::DropOldestQueue;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use doorward_hw::Frame;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const CAPTURE_BUCKET: &str = "captured-faces";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    RecognizedGranted,
    RecognizedDenied,
    Unrecognized,
    CallInitiated,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::RecognizedGranted => "recognized_granted",
            NotificationStatus::RecognizedDenied => "recognized_denied",
            NotificationStatus::Unrecognized => "unrecognized",
            NotificationStatus::CallInitiated => "call_initiated",
        }
    }
}

/// Image attached to a notification.
#[derive(Debug, Clone)]
pub enum ImageRef {
    /// Already stored; sent as-is.
    Url(String),
    /// Raw capture; uploaded by the worker before posting.
    Frame(Frame),
}

#[derive(Debug, Clone)]
pub struct NotificationEvent {
    pub device_id: String,
    pub status: NotificationStatus,
    pub image: Option<ImageRef>,
    pub person_name: Option<String>,
    pub confidence: Option<f32>,
    pub faces: Option<usize>,
    pub timestamp: DateTime<Utc>,
}

impl NotificationEvent {
    pub fn new(device_id: impl Into<String>, status: NotificationStatus) -> Self {
        Self {
            device_id: device_id.into(),
            status,
            image: None,
            person_name: None,
            confidence: None,
            faces: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_frame(mut self, frame: Frame) -> Self {
        self.image = Some(ImageRef::Frame(frame));
        self
    }
}

pub type NotificationQueue = Arc<DropOldestQueue<NotificationEvent>>;

/// Upload filename: `{person}_{status}_{YYYYmmdd_HHMMSS}.jpg`, with the person
/// name reduced to alphanumerics, `-`, `_` and spaces (spaces become `_`).
pub fn capture_filename(person: &str, status: NotificationStatus, at: DateTime<Utc>) -> String {
    let safe: String = person
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect();
    let safe = safe.trim_end().replace(' ', "_");
    format!("{}_{}_{}.jpg", safe, status.as_str(), at.format("%Y%m%d_%H%M%S"))
}

pub struct NotificationPipeline<B: ?Sized> {
    backend: Arc<B>,
    queue: NotificationQueue,
    upload_timeout: Duration,
    jpeg_quality: u8,
}

impl<B: Backend + ?Sized> NotificationPipeline<B> {
    pub fn new(backend: Arc<B>, queue: NotificationQueue, upload_timeout: Duration, jpeg_quality: u8) -> Self {
        Self {
            backend,
            queue,
            upload_timeout,
            jpeg_quality,
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!("notification worker started");
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = self.queue.pop() => event,
            };
            let status = event.status;
            if let Err(e) = self.deliver(event).await {
                tracing::error!(status = status.as_str(), error = %e, "notification dropped");
            }
        }
        let pending = self.queue.len();
        tracing::info!(pending, dropped = self.queue.dropped(), "notification worker stopped");
    }

    /// Upload (if needed) and post one event. One attempt, no retry.
    pub async fn deliver(&self, event: NotificationEvent) -> Result<(), BackendError> {
        let image_url = match &event.image {
            None => None,
            Some(ImageRef::Url(url)) => Some(url.clone()),
            Some(ImageRef::Frame(frame)) => self.upload(&event, frame.clone()).await,
        };

        let notification = DeviceNotification {
            device_id: event.device_id,
            status: event.status,
            image_url,
            confidence: event.confidence,
            person_name: event.person_name,
            faces: event.faces,
            timestamp: event.timestamp,
        };
        self.backend.notify_device(&notification).await?;
        tracing::info!(
            status = notification.status.as_str(),
            with_image = notification.image_url.is_some(),
            "notification sent"
        );
        Ok(())
    }

    /// Encode and upload a capture. Any failure yields `None`.
    async fn upload(&self, event: &NotificationEvent, frame: Frame) -> Option<String> {
        let quality = self.jpeg_quality;
        let jpeg = match tokio::task::spawn_blocking(move || frame.to_jpeg(quality)).await {
            Ok(Ok(jpeg)) => jpeg,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "capture encode failed; sending without image");
                return None;
            }
            Err(e) => {
                tracing::warn!(error = %e, "capture encode task failed; sending without image");
                return None;
            }
        };

        let person = event.person_name.as_deref().unwrap_or("Unknown");
        let upload = CaptureUpload {
            device_id: event.device_id.clone(),
            image_data_base64: STANDARD.encode(&jpeg),
            filename: capture_filename(person, event.status, event.timestamp),
            person_name: person.to_string(),
            status: event.status,
            bucket: CAPTURE_BUCKET,
            timestamp: event.timestamp,
        };

        match tokio::time::timeout(self.upload_timeout, self.backend.upload_capture(&upload)).await {
            Ok(Ok(url)) => {
                tracing::debug!(%url, "capture uploaded");
                Some(url)
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "capture upload failed; sending without image");
                None
            }
            Err(_) => {
                tracing::warn!(timeout = ?self.upload_timeout, "capture upload timed out; sending without image");
                None
            }
        }
    }
}
