//! Sysfs GPIO drivers (`/sys/class/gpio`).

use crate::hardware::{Button, Buzzer, HardwareError, Indicator, Relay};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const SYSFS_GPIO_ROOT: &str = "/sys/class/gpio";

/// One exported GPIO line.
#[derive(Debug, Clone)]
pub struct GpioPin {
    pin: u32,
    dir: PathBuf,
}

impl GpioPin {
    /// Export `pin` under `root` (if needed) and configure it as an output driven low.
    pub fn output(root: &Path, pin: u32) -> Result<Self, HardwareError> {
        let gpio = Self::export(root, pin)?;
        gpio.write_attr("direction", "out")?;
        gpio.set(false)?;
        Ok(gpio)
    }

    /// Export `pin` under `root` (if needed) and configure it as an input.
    pub fn input(root: &Path, pin: u32) -> Result<Self, HardwareError> {
        let gpio = Self::export(root, pin)?;
        gpio.write_attr("direction", "in")?;
        Ok(gpio)
    }

    fn export(root: &Path, pin: u32) -> Result<Self, HardwareError> {
        let dir = root.join(format!("gpio{pin}"));
        if !dir.exists() {
            std::fs::write(root.join("export"), pin.to_string())
                .map_err(|source| HardwareError::Gpio { pin, source })?;
        }
        Ok(Self { pin, dir })
    }

    fn write_attr(&self, attr: &str, value: &str) -> Result<(), HardwareError> {
        std::fs::write(self.dir.join(attr), value).map_err(|source| HardwareError::Gpio {
            pin: self.pin,
            source,
        })
    }

    pub fn set(&self, high: bool) -> Result<(), HardwareError> {
        self.write_attr("value", if high { "1" } else { "0" })
    }

    pub fn get(&self) -> Result<bool, HardwareError> {
        let raw = std::fs::read_to_string(self.dir.join("value")).map_err(|source| {
            HardwareError::Gpio {
                pin: self.pin,
                source,
            }
        })?;
        Ok(raw.trim() == "1")
    }
}

/// A plain driven-high output: relay coil or indicator lamp.
pub struct GpioOutput(pub GpioPin);

impl Relay for GpioOutput {
    fn open(&mut self) -> Result<(), HardwareError> {
        self.0.set(true)
    }

    fn close(&mut self) -> Result<(), HardwareError> {
        self.0.set(false)
    }
}

impl Indicator for GpioOutput {
    fn on(&mut self) -> Result<(), HardwareError> {
        self.0.set(true)
    }

    fn off(&mut self) -> Result<(), HardwareError> {
        self.0.set(false)
    }
}

/// Active-high push button (pulled down).
pub struct GpioButton(pub GpioPin);

impl Button for GpioButton {
    fn is_pressed(&mut self) -> Result<bool, HardwareError> {
        self.0.get()
    }
}

/// Buzzer driven by toggling a pin from a short-lived helper thread.
pub struct GpioBuzzer(pub GpioPin);

impl Buzzer for GpioBuzzer {
    fn beep(&mut self, duration_ms: u64, repeat: u32) -> Result<(), HardwareError> {
        let pin = self.0.clone();
        let on = Duration::from_millis(duration_ms);
        std::thread::Builder::new()
            .name("doorward-buzzer".into())
            .spawn(move || {
                for i in 0..repeat.max(1) {
                    if i > 0 {
                        std::thread::sleep(on);
                    }
                    if let Err(e) = pin.set(true) {
                        tracing::warn!(error = %e, "buzzer on failed");
                        return;
                    }
                    std::thread::sleep(on);
                    if let Err(e) = pin.set(false) {
                        tracing::warn!(error = %e, "buzzer off failed");
                        return;
                    }
                }
            })
            .map(|_| ())
            .map_err(|source| HardwareError::Gpio { pin: self.0.pin, source })
    }
}
