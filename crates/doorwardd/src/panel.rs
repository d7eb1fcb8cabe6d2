use doorward_hw::Hardware;
use std::sync::{Arc, Mutex, PoisonError};

/// The door-side outputs, shared by the access controller, the call session
/// and remote commands. Each actuation holds the lock only for the driver call.
#[derive(Clone)]
pub struct Panel {
    hw: Arc<Mutex<Hardware>>,
}

impl Panel {
    pub fn new(hw: Hardware) -> Self {
        Self {
            hw: Arc::new(Mutex::new(hw)),
        }
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut Hardware) -> R) -> R {
        let mut hw = self.hw.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut hw)
    }

    pub fn show(&self, line1: &str, line2: &str) {
        self.with(|hw| hw.show(&[line1, line2]));
    }

    /// Idle screen for the given lock state.
    pub fn show_ready(&self, locked: bool) {
        self.show("Ready", if locked { "Door Locked" } else { "Door Unlocked" });
    }
}
