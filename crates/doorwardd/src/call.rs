//! Doorbell call session: `CallIdle ⇄ Calling`.
//!
//! Presses (physical button, UI, remote command) are debounced and ignored
//! while a call is active. An accepted press notifies the backend, dials
//! through the telephony agent and ends on hangup or after a fixed timeout.
//! The backend notice is best-effort; only a failed dial aborts the call.

use crate::backend::{Backend, CallNotice};
use crate::config::Config;
use crate::notifier::{NotificationEvent, NotificationQueue, NotificationStatus};
use crate::panel::Panel;
use chrono::{DateTime, Utc};
use doorward_hw::{Button, CallAgent, CallError, LatestFrame};
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

const FAILURE_HOLD: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct CallConfig {
    pub device_id: String,
    pub device_name: String,
    pub debounce: Duration,
    pub timeout: Duration,
}

impl CallConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            device_id: config.device_id.clone(),
            device_name: config.device_name.clone(),
            debounce: config.button_debounce(),
            timeout: config.call_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallPhase {
    Idle,
    Calling,
}

/// Snapshot of the call session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CallSession {
    pub in_progress: bool,
    pub started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressOutcome {
    Accepted,
    /// Within the debounce window of the last accepted press.
    Debounced,
    /// A call is already in progress.
    Busy,
}

struct CallState {
    phase: CallPhase,
    started_at: Option<DateTime<Utc>>,
    last_accepted: Option<Instant>,
    hangup: Option<CancellationToken>,
}

type SharedAgent = Arc<Mutex<Box<dyn CallAgent>>>;

pub struct CallService<B: ?Sized> {
    config: CallConfig,
    backend: Arc<B>,
    agent: SharedAgent,
    panel: Panel,
    notifications: NotificationQueue,
    frames: Option<LatestFrame>,
    state: Mutex<CallState>,
    shutdown: CancellationToken,
}

impl<B: Backend + ?Sized + 'static> CallService<B> {
    pub fn new(
        config: CallConfig,
        backend: Arc<B>,
        agent: Box<dyn CallAgent>,
        panel: Panel,
        notifications: NotificationQueue,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            backend,
            agent: Arc::new(Mutex::new(agent)),
            panel,
            notifications,
            frames: None,
            state: Mutex::new(CallState {
                phase: CallPhase::Idle,
                started_at: None,
                last_accepted: None,
                hangup: None,
            }),
            shutdown,
        }
    }

    /// Attach a snapshot of the visitor to call notifications.
    pub fn with_frames(mut self, frames: LatestFrame) -> Self {
        self.frames = Some(frames);
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CallState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn session(&self) -> CallSession {
        let state = self.lock();
        CallSession {
            in_progress: state.phase == CallPhase::Calling,
            started_at: state.started_at,
        }
    }

    /// Handle a call request. On acceptance the call runs in the background.
    pub fn press(self: &Arc<Self>) -> PressOutcome {
        let hangup = {
            let mut state = self.lock();
            if state.phase == CallPhase::Calling {
                tracing::info!("call already in progress; press ignored");
                return PressOutcome::Busy;
            }
            let now = Instant::now();
            if let Some(last) = state.last_accepted {
                if now.duration_since(last) < self.config.debounce {
                    tracing::debug!("call press debounced");
                    return PressOutcome::Debounced;
                }
            }
            let hangup = self.shutdown.child_token();
            state.phase = CallPhase::Calling;
            state.started_at = Some(Utc::now());
            state.last_accepted = Some(now);
            state.hangup = Some(hangup.clone());
            hangup
        };

        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_call(hangup).await });
        PressOutcome::Accepted
    }

    /// End the active call early. Returns whether one was active.
    pub fn hangup(&self) -> bool {
        match &self.lock().hangup {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    async fn run_call(&self, hangup: CancellationToken) {
        tracing::info!("initiating call to owner");
        self.panel.show("Calling Owner...", "Please wait");

        if let Err(e) = self.place_call().await {
            tracing::error!(error = %e, "call failed");
            self.panel.show("Call Failed", "Try again");
            self.panel.with(|hw| {
                hw.failure_on();
                hw.beep(300, 3);
            });
            tokio::time::sleep(FAILURE_HOLD).await;
            self.panel.with(|hw| hw.failure_off());
            self.finish();
            return;
        }

        let mut event = NotificationEvent::new(self.config.device_id.clone(), NotificationStatus::CallInitiated);
        if let Some(frame) = self.frames.as_ref().and_then(|rx| rx.borrow().clone()) {
            event = event.with_frame(frame);
        }
        self.notifications.push(event);
        self.panel.with(|hw| hw.beep(100, 1));

        tokio::select! {
            _ = tokio::time::sleep(self.config.timeout) => tracing::info!("call timed out"),
            _ = hangup.cancelled() => tracing::info!("call hung up"),
        }

        if let Err(e) = self.with_agent(|agent| agent.hangup()).await {
            tracing::warn!(error = %e, "telephony hangup failed");
        }
        self.panel.show("Call Ended", "Ready");
        self.finish();
    }

    async fn place_call(&self) -> Result<(), CallError> {
        let notice = CallNotice {
            device_id: self.config.device_id.clone(),
            device_name: self.config.device_name.clone(),
            timestamp: Utc::now(),
            call_type: "doorbell_button",
        };
        if let Err(e) = self.backend.notify_call(&notice).await {
            tracing::warn!(error = %e, "backend call notice failed; dialing anyway");
        }
        self.with_agent(|agent| agent.call()).await
    }

    /// Run a blocking agent operation off the runtime.
    async fn with_agent<F>(&self, op: F) -> Result<(), CallError>
    where
        F: FnOnce(&mut dyn CallAgent) -> Result<(), CallError> + Send + 'static,
    {
        let agent = Arc::clone(&self.agent);
        tokio::task::spawn_blocking(move || {
            let mut agent = agent.lock().unwrap_or_else(PoisonError::into_inner);
            op(&mut **agent)
        })
        .await
        .unwrap_or_else(|e| Err(CallError::Command(std::io::Error::other(e.to_string()))))
    }

    fn finish(&self) {
        let mut state = self.lock();
        state.phase = CallPhase::Idle;
        state.started_at = None;
        state.hangup = None;
    }

    /// Stop the telephony agent. Called once at shutdown.
    pub async fn shutdown_agent(&self) {
        let agent = Arc::clone(&self.agent);
        let stopped = tokio::task::spawn_blocking(move || {
            agent.lock().unwrap_or_else(PoisonError::into_inner).shutdown();
        })
        .await;
        if let Err(e) = stopped {
            tracing::warn!(error = %e, "telephony shutdown task failed");
        }
    }
}

/// Poll the doorbell button and turn rising edges into call presses.
pub async fn poll_button<B>(
    mut button: Box<dyn Button>,
    calls: Arc<CallService<B>>,
    interval: Duration,
    cancel: CancellationToken,
) where
    B: Backend + ?Sized + 'static,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut was_pressed = false;
    let mut faults = 0u32;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        match button.is_pressed() {
            Ok(pressed) => {
                faults = 0;
                if pressed && !was_pressed {
                    let outcome = calls.press();
                    tracing::info!(?outcome, "doorbell button pressed");
                }
                was_pressed = pressed;
            }
            Err(e) => {
                faults += 1;
                if faults == 1 {
                    tracing::warn!(error = %e, "button read failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::DropOldestQueue;
    use crate::testing::{recording_hardware, AgentLog, FakeAgent, HwLog, ScriptedBackend};
    use std::sync::atomic::Ordering;

    struct Rig {
        calls: Arc<CallService<ScriptedBackend>>,
        backend: Arc<ScriptedBackend>,
        agent: AgentLog,
        log: HwLog,
        queue: NotificationQueue,
    }

    fn rig() -> Rig {
        let (hw, log) = recording_hardware();
        let backend = Arc::new(ScriptedBackend::default());
        let agent = AgentLog::default();
        let queue: NotificationQueue = Arc::new(DropOldestQueue::new(8));
        let calls = Arc::new(CallService::new(
            CallConfig {
                device_id: "dev-1".into(),
                device_name: "Front Door".into(),
                debounce: Duration::from_secs(2),
                timeout: Duration::from_secs(30),
            },
            Arc::clone(&backend),
            Box::new(FakeAgent(agent.clone())),
            Panel::new(hw),
            Arc::clone(&queue),
            CancellationToken::new(),
        ));
        Rig {
            calls,
            backend,
            agent,
            log,
            queue,
        }
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        // Let spawn_blocking work finish.
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_presses_within_debounce_place_one_call() {
        let rig = rig();
        assert_eq!(rig.calls.press(), PressOutcome::Accepted);
        settle().await;
        rig.calls.hangup();
        settle().await;
        assert!(!rig.calls.session().in_progress);

        // Call already over, but still inside the 2s window of the first press.
        for _ in 0..5 {
            assert_eq!(rig.calls.press(), PressOutcome::Debounced);
            tokio::time::advance(Duration::from_millis(200)).await;
        }
        assert_eq!(rig.agent.calls.load(Ordering::SeqCst), 1);
        assert_eq!(rig.backend.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_presses_during_call_are_ignored() {
        let rig = rig();
        assert_eq!(rig.calls.press(), PressOutcome::Accepted);
        settle().await;
        assert!(rig.calls.session().in_progress);
        assert!(rig.calls.session().started_at.is_some());

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(rig.calls.press(), PressOutcome::Busy);

        // Times out at 30s.
        tokio::time::sleep(Duration::from_secs(26)).await;
        settle().await;
        assert!(!rig.calls.session().in_progress);
        assert_eq!(rig.agent.hangups.load(Ordering::SeqCst), 1);
        assert!(rig.log.contains("show Call Ended|Ready"));

        assert_eq!(rig.calls.press(), PressOutcome::Accepted);
        settle().await;
        assert_eq!(rig.agent.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_notifies_backend_and_queues_event() {
        let rig = rig();
        rig.calls.press();
        settle().await;

        let notices = rig.backend.calls.lock().unwrap().clone();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].device_name, "Front Door");
        assert_eq!(notices[0].call_type, "doorbell_button");

        let event = rig.queue.try_pop().unwrap();
        assert_eq!(event.status, NotificationStatus::CallInitiated);
        assert!(rig.log.contains("show Calling Owner...|Please wait"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_call_signals_and_returns_idle() {
        let rig = rig();
        rig.agent.fail.store(true, Ordering::SeqCst);
        rig.calls.press();
        settle().await;

        assert!(rig.log.contains("show Call Failed|Try again"));
        assert!(rig.log.contains("failure.on"));
        assert!(rig.log.contains("beep 300x3"));
        assert!(rig.queue.is_empty());

        tokio::time::sleep(FAILURE_HOLD).await;
        settle().await;
        assert!(rig.log.contains("failure.off"));
        assert!(!rig.calls.session().in_progress);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backend_outage_still_dials() {
        let rig = rig();
        rig.backend.fail_calls.store(true, Ordering::SeqCst);
        rig.calls.press();
        settle().await;

        assert_eq!(rig.agent.calls.load(Ordering::SeqCst), 1);
        assert!(rig.backend.calls.lock().unwrap().is_empty());
        assert!(rig.calls.session().in_progress);
        assert!(!rig.log.contains("show Call Failed|Try again"));
        assert!(!rig.log.contains("failure.on"));
        assert_eq!(rig.queue.try_pop().unwrap().status, NotificationStatus::CallInitiated);
    }

    #[test]
    fn test_hangup_without_call() {
        let rig = rig();
        assert!(!rig.calls.hangup());
    }
}
