//! Remote command channel: authenticate sealed commands, then apply them.

use crate::backend::Backend;
use crate::call::{CallService, PressOutcome};
use crate::door::{ChangeSource, DoorCell, LockState};
use crate::panel::Panel;
use chrono::{DateTime, TimeZone, Utc};
use doorward_core::envelope::NONCE_LEN;
use doorward_core::{Action, CommandKey, EnvelopeError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
    #[error("command issued at {issued_at} is outside the replay window (now {now})")]
    Expired { issued_at: i64, now: i64 },
    #[error("command already used")]
    Replayed,
}

/// An authenticated, fresh, not-yet-seen command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteCommand {
    pub action: Action,
    pub issued_at: DateTime<Utc>,
}

/// Decrypts envelopes and enforces single use within the replay window.
pub struct RemoteChannel {
    key: CommandKey,
    window_secs: i64,
    /// Consumed nonces with their issue time, pruned as they leave the window.
    consumed: Mutex<HashMap<[u8; NONCE_LEN], i64>>,
}

impl RemoteChannel {
    pub fn new(secret: &str, window: Duration) -> Self {
        Self {
            key: CommandKey::from_secret(secret),
            window_secs: window.as_secs() as i64,
            consumed: Mutex::new(HashMap::new()),
        }
    }

    pub fn handle(&self, envelope: &str, now: DateTime<Utc>) -> Result<RemoteCommand, AuthError> {
        let opened = self.key.open(envelope)?;
        let issued_at = opened.payload.timestamp;
        let now = now.timestamp();

        if (now - issued_at).abs() > self.window_secs {
            return Err(AuthError::Expired { issued_at, now });
        }

        let mut consumed = self.consumed.lock().unwrap_or_else(PoisonError::into_inner);
        let window = self.window_secs;
        consumed.retain(|_, issued| now - *issued <= window);
        if consumed.insert(opened.nonce, issued_at).is_some() {
            return Err(AuthError::Replayed);
        }

        Ok(RemoteCommand {
            action: opened.payload.action,
            issued_at: Utc
                .timestamp_opt(issued_at, 0)
                .single()
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
        })
    }
}

/// Result of applying a command, reported back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Door(LockState),
    Call(PressOutcome),
}

impl Applied {
    pub fn status(&self) -> &'static str {
        match self {
            Applied::Door(LockState::Locked) => "locked",
            Applied::Door(LockState::Unlocked) => "unlocked",
            Applied::Call(PressOutcome::Accepted) => "call_initiated",
            Applied::Call(PressOutcome::Debounced) => "call_debounced",
            Applied::Call(PressOutcome::Busy) => "call_in_progress",
        }
    }
}

/// Apply an authenticated command.
///
/// Door commands go through the shared door cell tagged `Remote` and drive
/// the relay to match; a stale write leaves both untouched.
pub fn apply<B>(command: RemoteCommand, door: &DoorCell, panel: &Panel, calls: &Arc<CallService<B>>) -> Applied
where
    B: Backend + ?Sized + 'static,
{
    tracing::info!(action = %command.action, issued_at = %command.issued_at, "remote command accepted");
    let target = match command.action {
        Action::Call => return Applied::Call(calls.press()),
        Action::Unlock => LockState::Unlocked,
        Action::Lock => LockState::Locked,
    };

    if door.set(target, ChangeSource::Remote).is_ok() {
        panel.with(|hw| match target {
            LockState::Unlocked => hw.open_relay(),
            LockState::Locked => hw.close_relay(),
        });
        panel.show_ready(target == LockState::Locked);
    }
    Applied::Door(door.get().state)
}
