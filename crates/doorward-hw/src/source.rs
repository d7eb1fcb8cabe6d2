//! Continuous capture into a single-slot "latest frame" cell.
//!
//! The capture loop runs on its own OS thread at the camera's native rate
//! and overwrites the cell on every frame. Consumers poll the cell at their
//! own pace; nothing downstream can slow capture down.

use crate::camera::{CameraError, CaptureDevice};
use crate::frame::Frame;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Read handle onto the latest-frame cell.
pub type LatestFrame = watch::Receiver<Option<Frame>>;

/// Consecutive capture failures between repeated warnings.
const FAILURE_LOG_EVERY: u32 = 50;

pub struct FrameSource {
    rx: LatestFrame,
    thread: Option<JoinHandle<()>>,
}

impl FrameSource {
    /// Start the capture thread. `fps` caps the loop rate; 0 means "as fast as the device delivers".
    pub fn spawn<C>(mut device: C, fps: u32, cancel: CancellationToken) -> Result<Self, CameraError>
    where
        C: CaptureDevice + 'static,
    {
        let (tx, rx) = watch::channel(None);
        let period = if fps > 0 {
            Duration::from_secs_f64(1.0 / fps as f64)
        } else {
            Duration::ZERO
        };

        let thread = std::thread::Builder::new()
            .name("doorward-capture".into())
            .spawn(move || {
                tracing::info!(fps, "capture loop started");
                let mut failures = 0u32;
                let mut captured = 0u64;

                while !cancel.is_cancelled() {
                    let started = Instant::now();
                    match device.capture() {
                        Ok(frame) => {
                            failures = 0;
                            captured += 1;
                            tx.send_replace(Some(frame));
                        }
                        Err(e) => {
                            failures += 1;
                            if failures == 1 || failures % FAILURE_LOG_EVERY == 0 {
                                tracing::warn!(error = %e, failures, "frame capture failed");
                            }
                        }
                    }
                    if let Some(rest) = period.checked_sub(started.elapsed()) {
                        std::thread::sleep(rest);
                    }
                }
                tracing::info!(captured, "capture loop stopped");
            })
            .map_err(|e| CameraError::CaptureFailed(format!("failed to spawn capture thread: {e}")))?;

        Ok(Self {
            rx,
            thread: Some(thread),
        })
    }

    pub fn subscribe(&self) -> LatestFrame {
        self.rx.clone()
    }

    /// Copy of the most recent frame, if any has been captured yet.
    pub fn latest(&self) -> Option<Frame> {
        self.rx.borrow().clone()
    }

    /// Wait for the capture thread to exit (after its token is cancelled).
    pub fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("capture thread panicked");
            }
        }
    }
}
