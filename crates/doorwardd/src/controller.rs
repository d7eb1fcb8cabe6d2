//! Access controller: the recognition-cycle state machine.
//!
//! `Idle → Detecting → (Granted | Denied) → Idle`. Only one cycle is ever in
//! flight; frames that arrive while a cycle runs, or inside the cooldown
//! that follows a completed cycle, are dropped rather than queued.

use crate::config::{AccessPolicy, Config};
use crate::door::{ChangeSource, DoorCell, LockState};
use crate::engine::Recognizer;
use crate::notifier::{NotificationEvent, NotificationQueue, NotificationStatus};
use crate::panel::Panel;
use doorward_core::{RecognitionReason, RecognitionResult};
use doorward_hw::{Frame, LatestFrame};
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub policy: AccessPolicy,
    pub cooldown: Duration,
    pub dwell: Duration,
    pub deny_hold: Duration,
    pub poll: Duration,
}

impl ControllerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            policy: config.access_policy,
            cooldown: config.recognition_cooldown(),
            dwell: config.grant_dwell(),
            deny_hold: config.deny_hold(),
            poll: config.controller_poll(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    Idle,
    Detecting,
    Granted,
    Denied,
}

struct CycleState {
    phase: CyclePhase,
    last_completed: Option<Instant>,
}

/// Single-slot guard over the recognition cycle.
pub struct CycleGuard {
    state: Mutex<CycleState>,
    cooldown: Duration,
}

impl CycleGuard {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            state: Mutex::new(CycleState {
                phase: CyclePhase::Idle,
                last_completed: None,
            }),
            cooldown,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CycleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn phase(&self) -> CyclePhase {
        self.lock().phase
    }

    /// `Idle → Detecting`, unless a cycle is in flight or the cooldown runs.
    fn try_begin(&self, now: Instant) -> bool {
        let mut state = self.lock();
        if state.phase != CyclePhase::Idle {
            return false;
        }
        if let Some(done) = state.last_completed {
            if now.duration_since(done) < self.cooldown {
                return false;
            }
        }
        state.phase = CyclePhase::Detecting;
        true
    }

    fn advance(&self, phase: CyclePhase) {
        self.lock().phase = phase;
    }

    /// Back to `Idle`. A cycle that reached a verdict starts the cooldown.
    fn finish(&self, completed_at: Option<Instant>) {
        let mut state = self.lock();
        state.phase = CyclePhase::Idle;
        if completed_at.is_some() {
            state.last_completed = completed_at;
        }
    }
}

/// What happened to one offered frame.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// A cycle was in flight or cooling down.
    Dropped,
    NoFaces,
    Granted { person: String },
    Denied { status: NotificationStatus },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    NoFaces,
    Grant,
    DenyRecognized,
    DenyUnknown,
}

fn decide(policy: AccessPolicy, result: &RecognitionResult, door: LockState) -> Verdict {
    // A vision outage reports NoMatch with zero faces; nobody is at the door.
    if result.reason == RecognitionReason::NoFaces || result.faces == 0 {
        return Verdict::NoFaces;
    }
    if !result.matched {
        return Verdict::DenyUnknown;
    }
    match (policy, door) {
        (AccessPolicy::RecognitionUnlocks, _) | (AccessPolicy::GateOnDoorState, LockState::Unlocked) => {
            Verdict::Grant
        }
        (AccessPolicy::GateOnDoorState, LockState::Locked) => Verdict::DenyRecognized,
    }
}

pub struct AccessController<R> {
    config: ControllerConfig,
    device_id: String,
    recognizer: R,
    door: DoorCell,
    panel: Panel,
    notifications: NotificationQueue,
    cycle: Arc<CycleGuard>,
}

impl<R: Recognizer> AccessController<R> {
    pub fn new(
        config: ControllerConfig,
        device_id: impl Into<String>,
        recognizer: R,
        door: DoorCell,
        panel: Panel,
        notifications: NotificationQueue,
    ) -> Self {
        let cycle = Arc::new(CycleGuard::new(config.cooldown));
        Self {
            config,
            device_id: device_id.into(),
            recognizer,
            door,
            panel,
            notifications,
            cycle,
        }
    }

    /// Read handle on the cycle state, for status reporting.
    pub fn cycle(&self) -> Arc<CycleGuard> {
        Arc::clone(&self.cycle)
    }

    /// Poll the latest-frame cell until cancelled, then put the outputs in
    /// their safe state.
    pub async fn run(self, mut frames: LatestFrame, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_sequence = None;
        tracing::info!(policy = ?self.config.policy, "access controller started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let latest = frames.borrow_and_update().clone();
            let Some(frame) = latest else { continue };
            if last_sequence == Some(frame.sequence) {
                continue;
            }
            last_sequence = Some(frame.sequence);

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.process(frame) => {}
            }
        }

        self.panel.with(|hw| hw.release());
        tracing::info!("access controller stopped");
    }

    /// Offer one frame to the state machine.
    pub async fn process(&self, frame: Frame) -> CycleOutcome {
        if !self.cycle.try_begin(Instant::now()) {
            return CycleOutcome::Dropped;
        }

        let result = self.recognizer.recognize(frame.clone()).await;
        let door = self.door.get().state;

        match decide(self.config.policy, &result, door) {
            Verdict::NoFaces => {
                self.cycle.finish(None);
                CycleOutcome::NoFaces
            }
            Verdict::Grant => self.grant(frame, result).await,
            Verdict::DenyRecognized => {
                self.deny(frame, result, NotificationStatus::RecognizedDenied).await
            }
            Verdict::DenyUnknown => self.deny(frame, result, NotificationStatus::Unrecognized).await,
        }
    }

    async fn grant(&self, frame: Frame, result: RecognitionResult) -> CycleOutcome {
        self.cycle.advance(CyclePhase::Granted);
        let person = result.person_name.clone().unwrap_or_default();
        tracing::info!(person = %person, confidence = ?result.confidence, "access granted");

        self.panel.with(|hw| {
            hw.open_relay();
            hw.success_on();
            hw.beep(100, 1);
            hw.show(&["Welcome", person.as_str()]);
        });
        // Gating on door state only pulses the relay; the owner's unlock stands.
        let owns_door = self.config.policy == AccessPolicy::RecognitionUnlocks;
        if owns_door {
            self.write_door(LockState::Unlocked);
        }
        self.enqueue(NotificationStatus::RecognizedGranted, frame, &result);

        tokio::time::sleep(self.config.dwell).await;

        if owns_door {
            self.write_door(LockState::Locked);
        }
        // The relay goes back to whatever the door state calls for.
        let locked = self.door.get().state == LockState::Locked;
        self.panel.with(|hw| {
            if locked {
                hw.close_relay();
            }
            hw.success_off();
        });
        self.panel.show_ready(locked);

        self.cycle.finish(Some(Instant::now()));
        CycleOutcome::Granted { person }
    }

    async fn deny(&self, frame: Frame, result: RecognitionResult, status: NotificationStatus) -> CycleOutcome {
        self.cycle.advance(CyclePhase::Denied);
        let lines: [&str; 2] = match status {
            NotificationStatus::RecognizedDenied => ["Door Locked", "Access Denied"],
            _ => ["Access Denied", "Unknown Person"],
        };
        tracing::info!(
            status = status.as_str(),
            person = ?result.person_name,
            faces = result.faces,
            "access denied"
        );

        self.panel.with(|hw| {
            hw.failure_on();
            hw.beep(300, 1);
            hw.show(&lines);
        });
        self.enqueue(status, frame, &result);

        tokio::time::sleep(self.config.deny_hold).await;

        self.panel.with(|hw| hw.failure_off());
        self.panel.show_ready(self.door.get().state == LockState::Locked);

        self.cycle.finish(Some(Instant::now()));
        CycleOutcome::Denied { status }
    }

    fn write_door(&self, state: LockState) {
        if let Err(e) = self.door.set(state, ChangeSource::Local) {
            tracing::debug!(error = %e, %state, "door write superseded");
        }
    }

    fn enqueue(&self, status: NotificationStatus, frame: Frame, result: &RecognitionResult) {
        let mut event = NotificationEvent::new(self.device_id.clone(), status).with_frame(frame);
        event.person_name = result.person_name.clone();
        event.confidence = result.confidence;
        if status == NotificationStatus::Unrecognized {
            event.faces = Some(result.faces);
        }
        if let Some(evicted) = self.notifications.push(event) {
            tracing::warn!(status = evicted.status.as_str(), "notification queue full; oldest event dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::DropOldestQueue;
    use crate::testing::{frame, embedding_at, recording_hardware, GatewayRecognizer, HwLog, ScriptedVision};
    use async_trait::async_trait;
    use doorward_core::{GalleryStore, GatewayConfig, RecognitionGateway};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config(policy: AccessPolicy) -> ControllerConfig {
        ControllerConfig {
            policy,
            cooldown: Duration::from_secs(3),
            dwell: Duration::from_secs(5),
            deny_hold: Duration::from_secs(3),
            poll: Duration::from_millis(100),
        }
    }

    struct Rig<R> {
        controller: Arc<AccessController<R>>,
        door: DoorCell,
        log: HwLog,
        queue: NotificationQueue,
    }

    fn rig<R: Recognizer>(policy: AccessPolicy, recognizer: R, door_state: LockState) -> Rig<R> {
        let (hw, log) = recording_hardware();
        let door = DoorCell::new(door_state);
        let queue: NotificationQueue = Arc::new(DropOldestQueue::new(16));
        let controller = AccessController::new(
            config(policy),
            "dev-1",
            recognizer,
            door.clone(),
            Panel::new(hw),
            Arc::clone(&queue),
        );
        Rig {
            controller: Arc::new(controller),
            door,
            log,
            queue,
        }
    }

    /// Real gateway over a one-person gallery ("Alice" = [1, 0]).
    fn gateway(vision: ScriptedVision) -> GatewayRecognizer {
        let gallery = Arc::new(GalleryStore::new());
        gallery.replace([("Alice".to_string(), vec![1.0, 0.0])]);
        GatewayRecognizer(std::sync::Mutex::new(RecognitionGateway::new(
            vision,
            gallery,
            GatewayConfig::with_threshold(0.6),
        )))
    }

    fn drain(queue: &NotificationQueue) -> Vec<NotificationEvent> {
        std::iter::from_fn(|| queue.try_pop()).collect()
    }

    #[test]
    fn test_decide() {
        let alice = RecognitionResult::matched("Alice".into(), 0.82, 1);
        let unknown = RecognitionResult::no_match(1);
        let gate = AccessPolicy::GateOnDoorState;
        let unlocks = AccessPolicy::RecognitionUnlocks;

        assert_eq!(decide(gate, &RecognitionResult::no_faces(), LockState::Unlocked), Verdict::NoFaces);
        assert_eq!(decide(gate, &alice, LockState::Unlocked), Verdict::Grant);
        assert_eq!(decide(gate, &alice, LockState::Locked), Verdict::DenyRecognized);
        assert_eq!(decide(unlocks, &alice, LockState::Locked), Verdict::Grant);
        assert_eq!(decide(unlocks, &unknown, LockState::Unlocked), Verdict::DenyUnknown);
        assert_eq!(decide(unlocks, &RecognitionResult::no_match(0), LockState::Locked), Verdict::NoFaces);
    }

    #[tokio::test(start_paused = true)]
    async fn test_alice_is_granted() {
        let rig = rig(
            AccessPolicy::RecognitionUnlocks,
            gateway(ScriptedVision::one_face(embedding_at(0.82))),
            LockState::Locked,
        );

        let run = {
            let controller = Arc::clone(&rig.controller);
            tokio::spawn(async move { controller.process(frame(1)).await })
        };

        // Mid-dwell: relay open, door unlocked.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(rig.controller.cycle().phase(), CyclePhase::Granted);
        assert!(rig.log.relay_open());
        assert_eq!(rig.door.get().state, LockState::Unlocked);

        let outcome = run.await.unwrap();
        assert_eq!(outcome, CycleOutcome::Granted { person: "Alice".into() });

        let events = drain(&rig.queue);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, NotificationStatus::RecognizedGranted);
        assert_eq!(events[0].person_name.as_deref(), Some("Alice"));
        assert!((events[0].confidence.unwrap() - 0.82).abs() < 1e-3);

        assert!(rig.log.contains("show Welcome|Alice"));
        assert!(!rig.log.relay_open());
        assert_eq!(rig.door.get().state, LockState::Locked);
        assert_eq!(rig.controller.cycle().phase(), CyclePhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_low_similarity_is_denied() {
        let rig = rig(
            AccessPolicy::RecognitionUnlocks,
            gateway(ScriptedVision::one_face(embedding_at(0.3))),
            LockState::Locked,
        );

        let outcome = rig.controller.process(frame(1)).await;
        assert_eq!(outcome, CycleOutcome::Denied { status: NotificationStatus::Unrecognized });

        let events = drain(&rig.queue);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, NotificationStatus::Unrecognized);
        assert_eq!(events[0].faces, Some(1));
        assert_eq!(events[0].person_name, None);

        assert!(!rig.log.contains("relay.open"));
        assert!(rig.log.contains("failure.on"));
        assert!(rig.log.contains("beep 300x1"));
        assert!(rig.log.contains("show Access Denied|Unknown Person"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gate_policy_denies_when_locked() {
        let rig = rig(
            AccessPolicy::GateOnDoorState,
            gateway(ScriptedVision::one_face(embedding_at(0.82))),
            LockState::Locked,
        );

        let outcome = rig.controller.process(frame(1)).await;
        assert_eq!(outcome, CycleOutcome::Denied { status: NotificationStatus::RecognizedDenied });
        let events = drain(&rig.queue);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].person_name.as_deref(), Some("Alice"));
        assert!(!rig.log.contains("relay.open"));
        assert!(rig.log.contains("show Door Locked|Access Denied"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gate_policy_grants_when_unlocked() {
        let rig = rig(
            AccessPolicy::GateOnDoorState,
            gateway(ScriptedVision::one_face(embedding_at(0.82))),
            LockState::Unlocked,
        );
        let outcome = rig.controller.process(frame(1)).await;
        assert_eq!(outcome, CycleOutcome::Granted { person: "Alice".into() });
        assert_eq!(rig.log.count("relay.open"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gate_grant_keeps_owner_unlock() {
        let rig = rig(
            AccessPolicy::GateOnDoorState,
            gateway(ScriptedVision::one_face(embedding_at(0.82))),
            LockState::Locked,
        );
        rig.door.set(LockState::Unlocked, ChangeSource::Remote).unwrap();
        let unlocked = rig.door.get();

        let first = rig.controller.process(frame(1)).await;
        assert_eq!(first, CycleOutcome::Granted { person: "Alice".into() });
        assert_eq!(rig.door.get(), unlocked);
        // Door still unlocked, so the relay stays released.
        assert!(rig.log.relay_open());
        assert!(rig.log.contains("show Ready|Door Unlocked"));

        tokio::time::advance(Duration::from_secs(4)).await;
        let second = rig.controller.process(frame(2)).await;
        assert_eq!(second, CycleOutcome::Granted { person: "Alice".into() });
        assert_eq!(rig.log.count("relay.open"), 2);
        assert_eq!(rig.log.count("relay.close"), 0);

        let door = rig.door.get();
        assert_eq!(door.state, LockState::Unlocked);
        assert_eq!(door.source, ChangeSource::Remote);
        assert_eq!(drain(&rig.queue).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_vision_outage_runs_no_cycle() {
        let rig = rig(
            AccessPolicy::RecognitionUnlocks,
            gateway(ScriptedVision::unavailable()),
            LockState::Locked,
        );
        assert_eq!(rig.controller.process(frame(1)).await, CycleOutcome::NoFaces);
        // No cooldown started, so the next frame is examined right away.
        assert_eq!(rig.controller.process(frame(2)).await, CycleOutcome::NoFaces);
        assert_eq!(rig.controller.cycle().phase(), CyclePhase::Idle);
        assert!(rig.log.events().is_empty());
        assert!(drain(&rig.queue).is_empty());
        assert_eq!(rig.door.get().state, LockState::Locked);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_faces_skips_cooldown() {
        let rig = rig(
            AccessPolicy::RecognitionUnlocks,
            gateway(ScriptedVision::no_faces()),
            LockState::Locked,
        );
        assert_eq!(rig.controller.process(frame(1)).await, CycleOutcome::NoFaces);
        assert_eq!(rig.controller.process(frame(2)).await, CycleOutcome::NoFaces);
        assert!(drain(&rig.queue).is_empty());
        assert!(rig.log.events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_after_cycle() {
        let rig = rig(
            AccessPolicy::RecognitionUnlocks,
            gateway(ScriptedVision::one_face(embedding_at(0.3))),
            LockState::Locked,
        );

        assert!(matches!(rig.controller.process(frame(1)).await, CycleOutcome::Denied { .. }));
        assert_eq!(rig.controller.process(frame(2)).await, CycleOutcome::Dropped);

        tokio::time::advance(Duration::from_millis(2900)).await;
        assert_eq!(rig.controller.process(frame(3)).await, CycleOutcome::Dropped);

        tokio::time::advance(Duration::from_millis(200)).await;
        assert!(matches!(rig.controller.process(frame(4)).await, CycleOutcome::Denied { .. }));
        assert_eq!(drain(&rig.queue).len(), 2);
    }

    /// Counts overlapping calls.
    struct SlowRecognizer {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Recognizer for SlowRecognizer {
        async fn recognize(&self, _frame: Frame) -> RecognitionResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(400)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            RecognitionResult::no_match(1)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_cycle_in_flight() {
        let rig = rig(
            AccessPolicy::RecognitionUnlocks,
            SlowRecognizer {
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
            },
            LockState::Locked,
        );

        let mut tasks = Vec::new();
        for i in 0..32u32 {
            let controller = Arc::clone(&rig.controller);
            tasks.push(tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(u64::from(i % 8) * 50)).await;
                controller.process(frame(i)).await
            }));
        }

        let mut processed = 0;
        for task in tasks {
            if task.await.unwrap() != CycleOutcome::Dropped {
                processed += 1;
            }
        }

        let recognizer = &rig.controller.recognizer;
        assert_eq!(recognizer.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(recognizer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(processed, 1);
        assert_eq!(drain(&rig.queue).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_releases_hardware_on_cancel() {
        let rig = rig(
            AccessPolicy::RecognitionUnlocks,
            gateway(ScriptedVision::one_face(embedding_at(0.82))),
            LockState::Locked,
        );
        let controller = Arc::try_unwrap(rig.controller).ok().unwrap();
        let (tx, rx) = tokio::sync::watch::channel(None);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(controller.run(rx, cancel.clone()));

        tx.send_replace(Some(frame(1)));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(rig.log.relay_open());

        cancel.cancel();
        task.await.unwrap();
        assert!(!rig.log.relay_open());
        assert!(rig.log.contains("display.clear"));
    }
}
