//! Backend API client.
//!
//! Everything the daemon needs from the cloud side sits behind the
//! [`Backend`] trait so the workers can be driven by fakes in tests.

use crate::door::LockState;
use crate::notifier::NotificationStatus;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("request timed out")]
    Timeout,
    #[error("backend returned HTTP {0}")]
    Status(u16),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            BackendError::Timeout
        } else if e.is_decode() {
            BackendError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            BackendError::Status(status.as_u16())
        } else {
            BackendError::Transport(e.to_string())
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallNotice {
    pub device_id: String,
    pub device_name: String,
    pub timestamp: DateTime<Utc>,
    pub call_type: &'static str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureUpload {
    pub device_id: String,
    pub image_data_base64: String,
    pub filename: String,
    pub person_name: String,
    pub status: NotificationStatus,
    pub bucket: &'static str,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceNotification {
    pub device_id: String,
    pub status: NotificationStatus,
    pub image_url: Option<String>,
    pub confidence: Option<f32>,
    pub person_name: Option<String>,
    /// Faces in the frame, reported for unrecognised visitors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub faces: Option<usize>,
    pub timestamp: DateTime<Utc>,
}

/// One enrolled face as served by the watchlist endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteEmbedding {
    pub name: String,
    pub embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct UploadResponse {
    url: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct DoorStateBody {
    state: LockState,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    #[serde(default)]
    embeddings: Vec<RemoteEmbedding>,
}

#[async_trait]
pub trait Backend: Send + Sync {
    /// `POST /api/notifications/call`
    async fn notify_call(&self, notice: &CallNotice) -> Result<(), BackendError>;

    /// `POST /api/images/upload-captured`, returning the stored image URL.
    async fn upload_capture(&self, upload: &CaptureUpload) -> Result<String, BackendError>;

    /// `POST /api/notifications/device`
    async fn notify_device(&self, notification: &DeviceNotification) -> Result<(), BackendError>;

    /// `GET /api/door/state/device/{id}`
    async fn door_state(&self) -> Result<LockState, BackendError>;

    /// `PUT /api/door/state/device/{id}`
    async fn put_door_state(&self, state: LockState) -> Result<(), BackendError>;

    /// `GET /api/watchlist/device/{id}/embeddings`
    async fn gallery_embeddings(&self) -> Result<Vec<RemoteEmbedding>, BackendError>;

    /// `POST /api/video/stream/{id}/frame` (multipart JPEG)
    async fn publish_frame(&self, jpeg: Bytes) -> Result<(), BackendError>;
}

/// [`Backend`] over HTTPS + JSON.
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    device_id: String,
}

impl HttpBackend {
    pub fn new(
        base_url: &str,
        device_id: &str,
        request_timeout: Duration,
    ) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("doorwardd/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            device_id: device_id.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, BackendError> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Status(status.as_u16()));
        }
        Ok(response)
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn notify_call(&self, notice: &CallNotice) -> Result<(), BackendError> {
        self.send(self.client.post(self.url("/api/notifications/call")).json(notice))
            .await?;
        Ok(())
    }

    async fn upload_capture(&self, upload: &CaptureUpload) -> Result<String, BackendError> {
        let response = self
            .send(self.client.post(self.url("/api/images/upload-captured")).json(upload))
            .await?;
        let body: UploadResponse = response.json().await?;
        body.url
            .ok_or_else(|| BackendError::Decode("upload response carries no url".into()))
    }

    async fn notify_device(&self, notification: &DeviceNotification) -> Result<(), BackendError> {
        self.send(
            self.client
                .post(self.url("/api/notifications/device"))
                .json(notification),
        )
        .await?;
        Ok(())
    }

    async fn door_state(&self) -> Result<LockState, BackendError> {
        let path = format!("/api/door/state/device/{}", self.device_id);
        let response = self.send(self.client.get(self.url(&path))).await?;
        let body: DoorStateBody = response.json().await?;
        Ok(body.state)
    }

    async fn put_door_state(&self, state: LockState) -> Result<(), BackendError> {
        let path = format!("/api/door/state/device/{}", self.device_id);
        self.send(self.client.put(self.url(&path)).json(&DoorStateBody { state }))
            .await?;
        Ok(())
    }

    async fn gallery_embeddings(&self) -> Result<Vec<RemoteEmbedding>, BackendError> {
        let path = format!("/api/watchlist/device/{}/embeddings", self.device_id);
        let response = self.send(self.client.get(self.url(&path))).await?;
        let body: EmbeddingsResponse = response.json().await?;
        Ok(body.embeddings)
    }

    async fn publish_frame(&self, jpeg: Bytes) -> Result<(), BackendError> {
        let path = format!("/api/video/stream/{}/frame", self.device_id);
        let part = reqwest::multipart::Part::bytes(jpeg.to_vec())
            .file_name("frame.jpg")
            .mime_str("image/jpeg")?;
        let form = reqwest::multipart::Form::new().part("frame", part);
        self.send(self.client.post(self.url(&path)).multipart(form))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_wire_names() {
        let n = DeviceNotification {
            device_id: "dev-1".into(),
            status: NotificationStatus::RecognizedGranted,
            image_url: None,
            confidence: Some(0.82),
            person_name: Some("Alice".into()),
            faces: None,
            timestamp: Utc::now(),
        };
        let v = serde_json::to_value(&n).unwrap();
        assert_eq!(v["deviceId"], "dev-1");
        assert_eq!(v["status"], "recognized_granted");
        assert_eq!(v["personName"], "Alice");
        assert!(v["imageUrl"].is_null());
        assert!(v.get("faces").is_none());
    }

    #[test]
    fn test_embeddings_response_tolerates_missing_list() {
        let body: EmbeddingsResponse = serde_json::from_str("{}").unwrap();
        assert!(body.embeddings.is_empty());

        let body: EmbeddingsResponse =
            serde_json::from_str(r#"{"embeddings":[{"name":"Alice","embedding":[0.1,0.2]}]}"#)
                .unwrap();
        assert_eq!(body.embeddings[0].name, "Alice");
        assert_eq!(body.embeddings[0].embedding, vec![0.1, 0.2]);
    }

    #[test]
    fn test_door_state_body() {
        let body: DoorStateBody = serde_json::from_str(r#"{"state":"unlocked"}"#).unwrap();
        assert_eq!(body.state, LockState::Unlocked);
        assert_eq!(
            serde_json::to_string(&DoorStateBody { state: LockState::Locked }).unwrap(),
            r#"{"state":"locked"}"#
        );
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let backend = HttpBackend::new("http://backend/", "dev-1", Duration::from_secs(1)).unwrap();
        assert_eq!(backend.url("/api/x"), "http://backend/api/x");
    }
}
