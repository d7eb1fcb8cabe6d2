//! The shared door-state cell.
//!
//! Every writer (access controller, remote commands, backend sync) goes
//! through [`DoorCell::write`], which rejects writes older than the state
//! they would replace. Readers subscribe to the underlying watch channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockState {
    Locked,
    Unlocked,
}

impl std::fmt::Display for LockState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            LockState::Locked => "locked",
            LockState::Unlocked => "unlocked",
        })
    }
}

/// Who asked for a door-state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeSource {
    /// The access controller on this device.
    Local,
    /// An authenticated remote command.
    Remote,
    /// Backend-held state applied by the synchronizer.
    Schedule,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DoorState {
    pub state: LockState,
    pub changed_at: DateTime<Utc>,
    pub source: ChangeSource,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("stale door-state write at {attempted}, current state dates from {current}")]
pub struct StaleWrite {
    pub attempted: DateTime<Utc>,
    pub current: DateTime<Utc>,
}

/// Single serialization point for [`DoorState`].
#[derive(Clone)]
pub struct DoorCell {
    tx: Arc<watch::Sender<DoorState>>,
}

impl DoorCell {
    pub fn new(initial: LockState) -> Self {
        let (tx, _) = watch::channel(DoorState {
            state: initial,
            changed_at: DateTime::<Utc>::MIN_UTC,
            source: ChangeSource::Local,
        });
        Self { tx: Arc::new(tx) }
    }

    pub fn get(&self) -> DoorState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<DoorState> {
        self.tx.subscribe()
    }

    /// Apply a write stamped `at`.
    ///
    /// Writes older than the current `changed_at` fail with [`StaleWrite`];
    /// equal timestamps are accepted. Returns whether the lock state changed.
    /// Subscribers are only woken when it did.
    pub fn write(
        &self,
        state: LockState,
        source: ChangeSource,
        at: DateTime<Utc>,
    ) -> Result<bool, StaleWrite> {
        let mut outcome = Ok(false);
        self.tx.send_if_modified(|current| {
            if at < current.changed_at {
                outcome = Err(StaleWrite {
                    attempted: at,
                    current: current.changed_at,
                });
                return false;
            }
            let changed = current.state != state;
            *current = DoorState {
                state,
                changed_at: at,
                source,
            };
            outcome = Ok(changed);
            changed
        });

        match &outcome {
            Ok(true) => tracing::info!(%state, ?source, "door state changed"),
            Ok(false) => {}
            Err(e) => tracing::warn!(%state, ?source, error = %e, "door-state write rejected"),
        }
        outcome
    }

    /// [`write`](Self::write) stamped with the current time.
    pub fn set(&self, state: LockState, source: ChangeSource) -> Result<bool, StaleWrite> {
        self.write(state, source, Utc::now())
    }
}
