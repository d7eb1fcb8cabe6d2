//! Door-state synchronizer.
//!
//! Polls the backend-held door state and applies it locally when the
//! backend's value changes, driving the relay the same way a remote command
//! does. Local and remote-command transitions flow the
//! other way so a poll never undoes them. Repeated failures widen the poll
//! interval until the next success.

use crate::backend::{Backend, BackendError};
use crate::config::Config;
use crate::door::{ChangeSource, DoorCell, DoorState, LockState};
use crate::panel::Panel;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct SyncBackoff {
    interval: Duration,
    backoff: Duration,
    after: u32,
    failures: u32,
}

impl SyncBackoff {
    pub fn new(interval: Duration, backoff: Duration, after: u32) -> Self {
        Self {
            interval,
            backoff,
            after: after.max(1),
            failures: 0,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.door_sync_interval(),
            config.door_sync_backoff(),
            config.door_sync_backoff_after,
        )
    }

    pub fn delay(&self) -> Duration {
        if self.failures >= self.after {
            self.backoff
        } else {
            self.interval
        }
    }

    pub fn record_success(&mut self) {
        if self.failures >= self.after {
            tracing::info!("door sync recovered");
        }
        self.failures = 0;
    }

    pub fn record_failure(&mut self) {
        self.failures = self.failures.saturating_add(1);
        if self.failures == self.after {
            tracing::warn!(interval = ?self.backoff, "door sync backing off");
        }
    }
}

pub struct DoorSynchronizer<B: ?Sized> {
    backend: Arc<B>,
    door: DoorCell,
    backoff: SyncBackoff,
    panel: Option<Panel>,
    /// Last value read from (or pushed to) the backend.
    last_remote: Option<LockState>,
}

impl<B: Backend + ?Sized> DoorSynchronizer<B> {
    pub fn new(backend: Arc<B>, door: DoorCell, backoff: SyncBackoff) -> Self {
        Self {
            backend,
            door,
            backoff,
            panel: None,
            last_remote: None,
        }
    }

    /// Drive the relay and display when a backend value is applied.
    pub fn with_panel(mut self, panel: Panel) -> Self {
        self.panel = Some(panel);
        self
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        let mut changes = self.door.subscribe();
        let next_poll = tokio::time::sleep(self.backoff.delay());
        tokio::pin!(next_poll);
        tracing::info!(interval = ?self.backoff.delay(), "door sync started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = &mut next_poll => {
                    if let Err(e) = self.poll_once().await {
                        tracing::debug!(error = %e, retry_in = ?self.backoff.delay(), "door sync will retry");
                    }
                    next_poll.as_mut().reset(Instant::now() + self.backoff.delay());
                }
                changed = changes.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = *changes.borrow_and_update();
                    self.push(state).await;
                }
            }
        }
        tracing::info!("door sync stopped");
    }

    /// Fetch the backend state once and apply it if it changed.
    pub async fn poll_once(&mut self) -> Result<LockState, BackendError> {
        let remote = match self.backend.door_state().await {
            Ok(state) => state,
            Err(e) => {
                self.backoff.record_failure();
                tracing::warn!(error = %e, next = ?self.backoff.delay(), "door state poll failed");
                return Err(e);
            }
        };
        self.backoff.record_success();

        if self.last_remote != Some(remote) {
            self.last_remote = Some(remote);
            if self.door.get().state != remote {
                tracing::info!(state = %remote, "applying backend door state");
                self.apply(remote);
            }
        }
        Ok(remote)
    }

    fn apply(&self, state: LockState) {
        if let Err(e) = self.door.set(state, ChangeSource::Schedule) {
            tracing::debug!(error = %e, %state, "backend door state superseded");
            return;
        }
        if let Some(panel) = &self.panel {
            panel.with(|hw| match state {
                LockState::Unlocked => hw.open_relay(),
                LockState::Locked => hw.close_relay(),
            });
            panel.show_ready(state == LockState::Locked);
        }
    }

    /// Report a device-side transition to the backend.
    async fn push(&mut self, state: DoorState) {
        if state.source == ChangeSource::Schedule {
            return;
        }
        match self.backend.put_door_state(state.state).await {
            Ok(()) => {
                self.last_remote = Some(state.state);
                tracing::debug!(state = %state.state, "door state pushed");
            }
            Err(e) => tracing::warn!(error = %e, state = %state.state, "door state push failed"),
        }
    }
}
