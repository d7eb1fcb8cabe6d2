use async_trait::async_trait;
use doorward_core::{RecognitionGateway, RecognitionResult, Vision};
use doorward_hw::Frame;
use std::panic::{self, AssertUnwindSafe};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from the access controller to the engine thread.
struct EngineRequest {
    frame: Frame,
    reply: oneshot::Sender<RecognitionResult>,
}

/// Something that turns a frame into a verdict.
///
/// Implementations never fail: errors degrade to a non-match.
#[async_trait]
pub trait Recognizer: Send + Sync {
    async fn recognize(&self, frame: Frame) -> RecognitionResult;
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Queue one frame for recognition and wait for the verdict.
    pub async fn submit(&self, frame: Frame) -> Result<RecognitionResult, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest {
                frame,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }
}

#[async_trait]
impl Recognizer for EngineHandle {
    async fn recognize(&self, frame: Frame) -> RecognitionResult {
        match self.submit(frame).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(error = %e, "recognition unavailable");
                RecognitionResult::no_match(0)
            }
        }
    }
}

/// Spawn the recognition gateway on a dedicated OS thread.
///
/// Vision calls block for up to a second; keeping them off the runtime
/// means only the access controller ever waits on them. A panic inside
/// the vision capability is caught and reported as a non-match.
pub fn spawn_engine<V>(mut gateway: RecognitionGateway<V>) -> Result<EngineHandle, EngineError>
where
    V: Vision + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(1);

    std::thread::Builder::new()
        .name("doorward-engine".into())
        .spawn(move || {
            tracing::info!(threshold = gateway.config().threshold, "engine thread started");
            while let Some(req) = rx.blocking_recv() {
                let result = panic::catch_unwind(AssertUnwindSafe(|| {
                    gateway.recognize(&req.frame.image)
                }))
                .unwrap_or_else(|_| {
                    tracing::error!(sequence = req.frame.sequence, "recognition panicked");
                    RecognitionResult::no_match(0)
                });
                if req.reply.send(result).is_err() {
                    tracing::debug!(sequence = req.frame.sequence, "recognition caller went away");
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{frame, ScriptedVision};
    use doorward_core::{GalleryStore, GatewayConfig, RecognitionReason};
    use std::sync::Arc;

    fn gallery_with_alice() -> Arc<GalleryStore> {
        let gallery = Arc::new(GalleryStore::new());
        gallery.replace([("Alice".to_string(), vec![1.0, 0.0])]);
        gallery
    }

    #[tokio::test]
    async fn test_engine_returns_verdict() {
        let vision = ScriptedVision::one_face(vec![1.0, 0.0]);
        let gateway = RecognitionGateway::new(vision, gallery_with_alice(), GatewayConfig::with_threshold(0.6));
        let engine = spawn_engine(gateway).unwrap();

        let result = engine.recognize(frame(1)).await;
        assert!(result.matched);
        assert_eq!(result.person_name.as_deref(), Some("Alice"));
    }

    #[tokio::test]
    async fn test_panic_degrades_to_no_match() {
        let vision = ScriptedVision::panicking();
        let gateway = RecognitionGateway::new(vision, gallery_with_alice(), GatewayConfig::with_threshold(0.6));
        let engine = spawn_engine(gateway).unwrap();

        let result = engine.recognize(frame(1)).await;
        assert!(!result.matched);
        assert_eq!(result.reason, RecognitionReason::NoMatch);

        // The thread survives and keeps serving.
        let again = engine.recognize(frame(2)).await;
        assert_eq!(again.reason, RecognitionReason::NoMatch);
    }
}
