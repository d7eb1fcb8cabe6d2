//! Fakes shared by the daemon's unit tests.

use crate::backend::{Backend, BackendError, CallNotice, CaptureUpload, DeviceNotification, RemoteEmbedding};
use crate::door::LockState;
use crate::engine::Recognizer;
use async_trait::async_trait;
use bytes::Bytes;
use doorward_core::{Detection, RecognitionGateway, RecognitionResult, Vision, VisionError};
use doorward_hw::hardware::{Buzzer, Display, Hardware, HardwareError, Indicator, Relay};
use doorward_hw::{CallAgent, CallError, Frame};
use image::{Rgb, RgbImage};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub fn frame(sequence: u32) -> Frame {
    Frame::new(RgbImage::from_pixel(200, 200, Rgb([90, 120, 150])), sequence)
}

/// Unit vector whose cosine similarity with `[1, 0]` is `s`.
pub fn embedding_at(s: f32) -> Vec<f32> {
    vec![s, (1.0 - s * s).max(0.0).sqrt()]
}

// --- vision ---------------------------------------------------------------

pub struct ScriptedVision {
    detections: Vec<Detection>,
    embedding: Vec<f32>,
    panic: bool,
    unavailable: bool,
}

impl ScriptedVision {
    /// One well-sized face whose embedding is `embedding`.
    pub fn one_face(embedding: Vec<f32>) -> Self {
        Self {
            detections: vec![Detection {
                x1: 50.0,
                y1: 50.0,
                x2: 150.0,
                y2: 150.0,
                confidence: 0.9,
            }],
            embedding,
            panic: false,
            unavailable: false,
        }
    }

    pub fn no_faces() -> Self {
        Self {
            detections: Vec::new(),
            embedding: Vec::new(),
            panic: false,
            unavailable: false,
        }
    }

    pub fn panicking() -> Self {
        Self {
            panic: true,
            ..Self::no_faces()
        }
    }

    /// Every detection call fails as if the service were down.
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::no_faces()
        }
    }
}

impl Vision for ScriptedVision {
    fn detect(&mut self, _image: &RgbImage) -> Result<Vec<Detection>, VisionError> {
        if self.panic {
            panic!("scripted vision panic");
        }
        if self.unavailable {
            return Err(VisionError::Unavailable("vision service down".into()));
        }
        Ok(self.detections.clone())
    }

    fn embed(&mut self, _face: &RgbImage) -> Result<Vec<f32>, VisionError> {
        Ok(self.embedding.clone())
    }
}

/// Runs a real gateway inline, without the engine thread.
pub struct GatewayRecognizer(pub Mutex<RecognitionGateway<ScriptedVision>>);

#[async_trait]
impl Recognizer for GatewayRecognizer {
    async fn recognize(&self, frame: Frame) -> RecognitionResult {
        let mut gateway = self.0.lock().unwrap();
        gateway.recognize(&frame.image)
    }
}

// --- hardware -------------------------------------------------------------

/// Ordered record of every actuation.
#[derive(Clone, Default)]
pub struct HwLog(Arc<Mutex<Vec<String>>>);

impl HwLog {
    fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.events().iter().filter(|e| *e == event).count()
    }

    pub fn contains(&self, event: &str) -> bool {
        self.count(event) > 0
    }

    /// Whether the last relay actuation left it open.
    pub fn relay_open(&self) -> bool {
        self.events()
            .iter()
            .rev()
            .find(|e| e.starts_with("relay."))
            .is_some_and(|e| e == "relay.open")
    }
}

struct Recording {
    name: &'static str,
    log: HwLog,
}

impl Relay for Recording {
    fn open(&mut self) -> Result<(), HardwareError> {
        self.log.push("relay.open");
        Ok(())
    }

    fn close(&mut self) -> Result<(), HardwareError> {
        self.log.push("relay.close");
        Ok(())
    }
}

impl Indicator for Recording {
    fn on(&mut self) -> Result<(), HardwareError> {
        self.log.push(format!("{}.on", self.name));
        Ok(())
    }

    fn off(&mut self) -> Result<(), HardwareError> {
        self.log.push(format!("{}.off", self.name));
        Ok(())
    }
}

impl Buzzer for Recording {
    fn beep(&mut self, duration_ms: u64, repeat: u32) -> Result<(), HardwareError> {
        self.log.push(format!("beep {duration_ms}x{repeat}"));
        Ok(())
    }
}

impl Display for Recording {
    fn show(&mut self, lines: &[&str]) -> Result<(), HardwareError> {
        self.log.push(format!("show {}", lines.join("|")));
        Ok(())
    }

    fn clear(&mut self) -> Result<(), HardwareError> {
        self.log.push("display.clear");
        Ok(())
    }
}

pub fn recording_hardware() -> (Hardware, HwLog) {
    let log = HwLog::default();
    let part = |name| Recording {
        name,
        log: log.clone(),
    };
    let hw = Hardware {
        relay: Box::new(part("relay")),
        buzzer: Box::new(part("buzzer")),
        success: Box::new(part("success")),
        failure: Box::new(part("failure")),
        display: Box::new(part("display")),
    };
    (hw, log)
}

// --- telephony ------------------------------------------------------------

#[derive(Clone, Default)]
pub struct AgentLog {
    pub calls: Arc<AtomicUsize>,
    pub hangups: Arc<AtomicUsize>,
    pub fail: Arc<AtomicBool>,
}

pub struct FakeAgent(pub AgentLog);

impl CallAgent for FakeAgent {
    fn call(&mut self) -> Result<(), CallError> {
        self.0.calls.fetch_add(1, Ordering::SeqCst);
        if self.0.fail.load(Ordering::SeqCst) {
            return Err(CallError::NotRunning);
        }
        Ok(())
    }

    fn hangup(&mut self) -> Result<(), CallError> {
        self.0.hangups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn shutdown(&mut self) {}
}

// --- backend --------------------------------------------------------------

/// In-memory backend that records every request.
pub struct ScriptedBackend {
    pub calls: Mutex<Vec<CallNotice>>,
    pub uploads: Mutex<Vec<CaptureUpload>>,
    pub notifications: Mutex<Vec<DeviceNotification>>,
    pub door_puts: Mutex<Vec<LockState>>,
    pub door: Mutex<Result<LockState, BackendError>>,
    pub door_polls: AtomicUsize,
    pub gallery: Mutex<Result<Vec<RemoteEmbedding>, BackendError>>,
    pub frames: AtomicUsize,
    pub fail_calls: AtomicBool,
    pub fail_uploads: AtomicBool,
    pub fail_notifications: AtomicBool,
    pub fail_frames: AtomicBool,
    /// Uploads never answer (exercises the upload timeout).
    pub hang_uploads: AtomicBool,
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self {
            calls: Mutex::default(),
            uploads: Mutex::default(),
            notifications: Mutex::default(),
            door_puts: Mutex::default(),
            door: Mutex::new(Ok(LockState::Locked)),
            door_polls: AtomicUsize::new(0),
            gallery: Mutex::new(Ok(Vec::new())),
            frames: AtomicUsize::new(0),
            fail_calls: AtomicBool::new(false),
            fail_uploads: AtomicBool::new(false),
            fail_notifications: AtomicBool::new(false),
            fail_frames: AtomicBool::new(false),
            hang_uploads: AtomicBool::new(false),
        }
    }
}

impl ScriptedBackend {
    pub fn set_door(&self, state: Result<LockState, BackendError>) {
        *self.door.lock().unwrap() = state;
    }

    pub fn notifications(&self) -> Vec<DeviceNotification> {
        self.notifications.lock().unwrap().clone()
    }
}

fn fail_if(flag: &AtomicBool) -> Result<(), BackendError> {
    if flag.load(Ordering::SeqCst) {
        Err(BackendError::Status(503))
    } else {
        Ok(())
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    async fn notify_call(&self, notice: &CallNotice) -> Result<(), BackendError> {
        fail_if(&self.fail_calls)?;
        self.calls.lock().unwrap().push(notice.clone());
        Ok(())
    }

    async fn upload_capture(&self, upload: &CaptureUpload) -> Result<String, BackendError> {
        if self.hang_uploads.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        fail_if(&self.fail_uploads)?;
        self.uploads.lock().unwrap().push(upload.clone());
        Ok(format!("https://cdn.example/{}", upload.filename))
    }

    async fn notify_device(&self, notification: &DeviceNotification) -> Result<(), BackendError> {
        fail_if(&self.fail_notifications)?;
        self.notifications.lock().unwrap().push(notification.clone());
        Ok(())
    }

    async fn door_state(&self) -> Result<LockState, BackendError> {
        self.door_polls.fetch_add(1, Ordering::SeqCst);
        self.door.lock().unwrap().clone()
    }

    async fn put_door_state(&self, state: LockState) -> Result<(), BackendError> {
        self.door_puts.lock().unwrap().push(state);
        Ok(())
    }

    async fn gallery_embeddings(&self) -> Result<Vec<RemoteEmbedding>, BackendError> {
        self.gallery.lock().unwrap().clone()
    }

    async fn publish_frame(&self, _jpeg: Bytes) -> Result<(), BackendError> {
        self.frames.fetch_add(1, Ordering::SeqCst);
        fail_if(&self.fail_frames)
    }
}
