//! Live-view publisher.
//!
//! Reads the latest-frame cell at a capped rate, downsamples and encodes the
//! newest frame, and posts it to the backend. Capture never waits on the
//! network: frames that arrive between publishes are simply overwritten.

use crate::backend::Backend;
use crate::config::Config;
use bytes::Bytes;
use doorward_hw::LatestFrame;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub fps: u32,
    pub width: u32,
    pub jpeg_quality: u8,
    pub failure_limit: u32,
    pub pause: Duration,
}

impl StreamConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            fps: config.stream_fps,
            width: config.stream_width,
            jpeg_quality: config.jpeg_quality,
            failure_limit: config.stream_failure_limit,
            pause: config.stream_pause(),
        }
    }
}

/// Consecutive-failure counter that calls for a pause once the limit is hit.
#[derive(Debug)]
pub struct PublishBackoff {
    limit: u32,
    pause: Duration,
    consecutive: u32,
}

impl PublishBackoff {
    pub fn new(limit: u32, pause: Duration) -> Self {
        Self {
            limit: limit.max(1),
            pause,
            consecutive: 0,
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive = 0;
    }

    /// Count a failure; returns the pause to take when the limit is reached.
    pub fn record_failure(&mut self) -> Option<Duration> {
        self.consecutive += 1;
        if self.consecutive >= self.limit {
            self.consecutive = 0;
            Some(self.pause)
        } else {
            None
        }
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }
}

pub struct StreamPublisher<B: ?Sized> {
    backend: Arc<B>,
    config: StreamConfig,
    /// Cleared while paused after repeated failures.
    healthy: Arc<AtomicBool>,
}

impl<B: Backend + ?Sized> StreamPublisher<B> {
    pub fn new(backend: Arc<B>, config: StreamConfig) -> Self {
        Self {
            backend,
            config,
            healthy: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn health(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.healthy)
    }

    pub async fn run(self, mut frames: LatestFrame, cancel: CancellationToken) {
        let period = Duration::from_secs_f64(1.0 / self.config.fps.max(1) as f64);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut backoff = PublishBackoff::new(self.config.failure_limit, self.config.pause);
        let mut published = 0u64;
        tracing::info!(fps = self.config.fps, width = self.config.width, "stream publisher started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match frames.has_changed() {
                Ok(true) => {}
                Ok(false) => continue,
                Err(_) => {
                    tracing::info!("frame source closed");
                    break;
                }
            }
            let Some(frame) = frames.borrow_and_update().clone() else {
                continue;
            };

            let (width, quality) = (self.config.width, self.config.jpeg_quality);
            let jpeg = match tokio::task::spawn_blocking(move || frame.to_jpeg_scaled(width, quality)).await {
                Ok(Ok(jpeg)) => Bytes::from(jpeg),
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "stream frame encode failed");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "stream encode task failed");
                    continue;
                }
            };

            match self.backend.publish_frame(jpeg).await {
                Ok(()) => {
                    backoff.record_success();
                    published += 1;
                    tracing::debug!(published, "stream frame sent");
                }
                Err(e) => {
                    tracing::debug!(error = %e, failures = backoff.consecutive() + 1, "stream frame failed");
                    if let Some(pause) = backoff.record_failure() {
                        tracing::warn!(error = %e, ?pause, "stream publishing paused after repeated failures");
                        self.healthy.store(false, Ordering::Relaxed);
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(pause) => {}
                        }
                        self.healthy.store(true, Ordering::Relaxed);
                        tracing::info!("stream publishing resumed");
                        ticker.reset();
                    }
                }
            }
        }
        tracing::info!(published, "stream publisher stopped");
    }
}
