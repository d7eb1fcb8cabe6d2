//! Door-side I/O primitives: relay, buzzer, indicator lamps, button, display.
//!
//! Drivers only expose on/off/read. Callers go through [`Hardware`], which
//! treats every driver failure as a logged no-op so a flaky pin can never
//! take the controller down.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HardwareError {
    #[error("gpio {pin}: {source}")]
    Gpio {
        pin: u32,
        #[source]
        source: std::io::Error,
    },
    #[error("display: {0}")]
    Display(String),
}

/// Door strike / lock relay. `open` energises it and releases the door.
pub trait Relay: Send {
    fn open(&mut self) -> Result<(), HardwareError>;
    fn close(&mut self) -> Result<(), HardwareError>;
}

pub trait Buzzer: Send {
    /// Sound `repeat` beeps of `duration_ms` each. Must not block for the whole pattern.
    fn beep(&mut self, duration_ms: u64, repeat: u32) -> Result<(), HardwareError>;
}

pub trait Indicator: Send {
    fn on(&mut self) -> Result<(), HardwareError>;
    fn off(&mut self) -> Result<(), HardwareError>;
}

pub trait Button: Send {
    fn is_pressed(&mut self) -> Result<bool, HardwareError>;
}

pub trait Display: Send {
    fn show(&mut self, lines: &[&str]) -> Result<(), HardwareError>;
    fn clear(&mut self) -> Result<(), HardwareError>;
}

/// The output side of the door hardware, owned by the access controller.
pub struct Hardware {
    pub relay: Box<dyn Relay>,
    pub buzzer: Box<dyn Buzzer>,
    /// Lit while access is granted.
    pub success: Box<dyn Indicator>,
    /// Lit while access is denied or a call fails.
    pub failure: Box<dyn Indicator>,
    pub display: Box<dyn Display>,
}

fn log_fault(op: &'static str, result: Result<(), HardwareError>) {
    if let Err(e) = result {
        tracing::warn!(op, error = %e, "hardware fault; continuing");
    }
}

impl Hardware {
    pub fn open_relay(&mut self) {
        log_fault("relay.open", self.relay.open());
    }

    pub fn close_relay(&mut self) {
        log_fault("relay.close", self.relay.close());
    }

    pub fn beep(&mut self, duration_ms: u64, repeat: u32) {
        log_fault("buzzer.beep", self.buzzer.beep(duration_ms, repeat));
    }

    pub fn success_on(&mut self) {
        log_fault("success.on", self.success.on());
    }

    pub fn success_off(&mut self) {
        log_fault("success.off", self.success.off());
    }

    pub fn failure_on(&mut self) {
        log_fault("failure.on", self.failure.on());
    }

    pub fn failure_off(&mut self) {
        log_fault("failure.off", self.failure.off());
    }

    pub fn show(&mut self, lines: &[&str]) {
        log_fault("display.show", self.display.show(lines));
    }

    /// Put every output in its safe state: relay de-energised, lamps off, display blank.
    pub fn release(&mut self) {
        self.close_relay();
        self.success_off();
        self.failure_off();
        log_fault("display.clear", self.display.clear());
    }
}
