//! Simulated hardware for desktops and CI: every primitive just logs.

use crate::hardware::{Button, Buzzer, Display, Hardware, HardwareError, Indicator, Relay};

pub struct SimBuzzer;

impl Buzzer for SimBuzzer {
    fn beep(&mut self, duration_ms: u64, repeat: u32) -> Result<(), HardwareError> {
        tracing::info!(duration_ms, repeat, "[sim] buzzer beep");
        Ok(())
    }
}

/// A named on/off output that only logs its transitions.
pub struct SimOutput {
    pub name: &'static str,
}

impl SimOutput {
    fn log(&self, on: bool) -> Result<(), HardwareError> {
        tracing::info!(output = self.name, on, "[sim] output");
        Ok(())
    }
}

impl Relay for SimOutput {
    fn open(&mut self) -> Result<(), HardwareError> {
        self.log(true)
    }

    fn close(&mut self) -> Result<(), HardwareError> {
        self.log(false)
    }
}

impl Indicator for SimOutput {
    fn on(&mut self) -> Result<(), HardwareError> {
        self.log(true)
    }

    fn off(&mut self) -> Result<(), HardwareError> {
        self.log(false)
    }
}

/// Never pressed; calls come from the HTTP surface instead.
pub struct SimButton;

impl Button for SimButton {
    fn is_pressed(&mut self) -> Result<bool, HardwareError> {
        Ok(false)
    }
}

/// Writes display lines to the log. Also used on GPIO builds without an LCD driver.
pub struct LogDisplay;

impl Display for LogDisplay {
    fn show(&mut self, lines: &[&str]) -> Result<(), HardwareError> {
        tracing::info!(lines = ?lines, "display");
        Ok(())
    }

    fn clear(&mut self) -> Result<(), HardwareError> {
        tracing::debug!("display cleared");
        Ok(())
    }
}

/// A full set of simulated outputs.
pub fn simulated() -> Hardware {
    Hardware {
        relay: Box::new(SimOutput { name: "relay" }),
        buzzer: Box::new(SimBuzzer),
        success: Box::new(SimOutput { name: "success" }),
        failure: Box::new(SimOutput { name: "failure" }),
        display: Box::new(LogDisplay),
    }
}
