use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Whether a recognised face may open the door on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccessPolicy {
    /// A match grants access only while the door state is `Unlocked`.
    GateOnDoorState,
    /// Any match above the threshold grants access.
    RecognitionUnlocks,
}

impl std::str::FromStr for AccessPolicy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gate-on-door-state" => Ok(Self::GateOnDoorState),
            "recognition-unlocks" => Ok(Self::RecognitionUnlocks),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HardwareBackend {
    /// Log every actuation instead of touching pins.
    Sim,
    /// Sysfs GPIO.
    Gpio,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GpioPins {
    pub relay: u32,
    pub buzzer: u32,
    pub success: u32,
    pub failure: u32,
    pub button: u32,
}

impl Default for GpioPins {
    fn default() -> Self {
        Self {
            relay: 4,
            buzzer: 27,
            success: 13,
            failure: 21,
            button: 7,
        }
    }
}

/// Daemon configuration.
///
/// Built-in defaults, then the TOML file named by `DOORWARD_CONFIG` (if
/// set), then `DOORWARD_*` environment overrides.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub device_id: String,
    pub device_name: String,
    /// Base URL of the backend API, without trailing slash.
    pub backend_url: String,
    /// Shared secret for remote command envelopes.
    pub door_secret: String,

    pub camera_device: String,
    pub camera_width: u32,
    pub camera_height: u32,
    pub camera_fps: u32,

    /// Base URL of the out-of-process vision service.
    pub vision_url: String,
    pub similarity_threshold: f32,
    pub access_policy: AccessPolicy,
    pub recognition_cooldown_secs: u64,
    pub grant_dwell_secs: u64,
    pub deny_hold_secs: u64,
    pub controller_poll_hz: u32,

    pub button_debounce_secs: u64,
    pub call_timeout_secs: u64,
    pub sip_target: String,
    pub soundcard: Option<u32>,

    pub notification_capacity: usize,
    pub upload_timeout_secs: u64,
    pub request_timeout_secs: u64,

    pub stream_enabled: bool,
    pub stream_fps: u32,
    pub stream_width: u32,
    pub jpeg_quality: u8,
    pub stream_failure_limit: u32,
    pub stream_pause_secs: u64,

    pub door_sync_interval_secs: u64,
    pub door_sync_backoff_secs: u64,
    pub door_sync_backoff_after: u32,

    pub replay_window_secs: u64,
    pub listen_addr: String,

    pub hardware: HardwareBackend,
    pub gpio_root: PathBuf,
    pub pins: GpioPins,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_id: String::new(),
            device_name: "Smart Doorbell".to_string(),
            backend_url: String::new(),
            door_secret: String::new(),
            camera_device: "/dev/video0".to_string(),
            camera_width: 640,
            camera_height: 480,
            camera_fps: 15,
            vision_url: "http://127.0.0.1:8500".to_string(),
            similarity_threshold: 0.60,
            access_policy: AccessPolicy::GateOnDoorState,
            recognition_cooldown_secs: 3,
            grant_dwell_secs: 5,
            deny_hold_secs: 3,
            controller_poll_hz: 10,
            button_debounce_secs: 2,
            call_timeout_secs: 30,
            sip_target: "sip:owner@localhost".to_string(),
            soundcard: None,
            notification_capacity: 16,
            upload_timeout_secs: 10,
            request_timeout_secs: 10,
            stream_enabled: true,
            stream_fps: 5,
            stream_width: 320,
            jpeg_quality: 80,
            stream_failure_limit: 5,
            stream_pause_secs: 10,
            door_sync_interval_secs: 2,
            door_sync_backoff_secs: 10,
            door_sync_backoff_after: 3,
            replay_window_secs: 10,
            listen_addr: "0.0.0.0:5000".to_string(),
            hardware: HardwareBackend::Sim,
            gpio_root: PathBuf::from(doorward_hw::gpio::SYSFS_GPIO_ROOT),
            pins: GpioPins::default(),
        }
    }
}

impl Config {
    /// Load from the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("DOORWARD_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&raw)?)
    }

    /// Apply `DOORWARD_*` overrides through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);

        env.string("DOORWARD_DEVICE_ID", &mut self.device_id);
        env.string("DOORWARD_DEVICE_NAME", &mut self.device_name);
        env.string("DOORWARD_BACKEND_URL", &mut self.backend_url);
        env.string("DOORWARD_DOOR_SECRET", &mut self.door_secret);
        env.string("DOORWARD_CAMERA_DEVICE", &mut self.camera_device);
        env.parse("DOORWARD_CAMERA_WIDTH", &mut self.camera_width)?;
        env.parse("DOORWARD_CAMERA_HEIGHT", &mut self.camera_height)?;
        env.parse("DOORWARD_CAMERA_FPS", &mut self.camera_fps)?;
        env.string("DOORWARD_VISION_URL", &mut self.vision_url);
        env.parse("DOORWARD_SIMILARITY_THRESHOLD", &mut self.similarity_threshold)?;
        env.parse("DOORWARD_RECOGNITION_COOLDOWN_SECS", &mut self.recognition_cooldown_secs)?;
        env.parse("DOORWARD_GRANT_DWELL_SECS", &mut self.grant_dwell_secs)?;
        env.parse("DOORWARD_DENY_HOLD_SECS", &mut self.deny_hold_secs)?;
        env.parse("DOORWARD_CONTROLLER_POLL_HZ", &mut self.controller_poll_hz)?;
        env.parse("DOORWARD_BUTTON_DEBOUNCE_SECS", &mut self.button_debounce_secs)?;
        env.parse("DOORWARD_CALL_TIMEOUT_SECS", &mut self.call_timeout_secs)?;
        env.string("DOORWARD_SIP_TARGET", &mut self.sip_target);
        if let Some(raw) = lookup("DOORWARD_SOUNDCARD") {
            self.soundcard = Some(raw.parse().map_err(|_| ConfigError::Invalid {
                key: "DOORWARD_SOUNDCARD",
                value: raw,
            })?);
        }
        env.parse("DOORWARD_NOTIFICATION_CAPACITY", &mut self.notification_capacity)?;
        env.parse("DOORWARD_UPLOAD_TIMEOUT_SECS", &mut self.upload_timeout_secs)?;
        env.parse("DOORWARD_REQUEST_TIMEOUT_SECS", &mut self.request_timeout_secs)?;
        if let Some(raw) = lookup("DOORWARD_STREAM_ENABLED") {
            self.stream_enabled = raw != "0";
        }
        env.parse("DOORWARD_STREAM_FPS", &mut self.stream_fps)?;
        env.parse("DOORWARD_STREAM_WIDTH", &mut self.stream_width)?;
        env.parse("DOORWARD_JPEG_QUALITY", &mut self.jpeg_quality)?;
        env.parse("DOORWARD_STREAM_FAILURE_LIMIT", &mut self.stream_failure_limit)?;
        env.parse("DOORWARD_STREAM_PAUSE_SECS", &mut self.stream_pause_secs)?;
        env.parse("DOORWARD_DOOR_SYNC_INTERVAL_SECS", &mut self.door_sync_interval_secs)?;
        env.parse("DOORWARD_DOOR_SYNC_BACKOFF_SECS", &mut self.door_sync_backoff_secs)?;
        env.parse("DOORWARD_DOOR_SYNC_BACKOFF_AFTER", &mut self.door_sync_backoff_after)?;
        env.parse("DOORWARD_REPLAY_WINDOW_SECS", &mut self.replay_window_secs)?;
        env.string("DOORWARD_LISTEN_ADDR", &mut self.listen_addr);

        if let Some(raw) = lookup("DOORWARD_ACCESS_POLICY") {
            self.access_policy = raw.parse().map_err(|_| ConfigError::Invalid {
                key: "DOORWARD_ACCESS_POLICY",
                value: raw,
            })?;
        }
        if let Some(raw) = lookup("DOORWARD_HARDWARE") {
            self.hardware = match raw.as_str() {
                "sim" => HardwareBackend::Sim,
                "gpio" => HardwareBackend::Gpio,
                _ => {
                    return Err(ConfigError::Invalid {
                        key: "DOORWARD_HARDWARE",
                        value: raw,
                    })
                }
            };
        }
        if let Some(raw) = lookup("DOORWARD_GPIO_ROOT") {
            self.gpio_root = PathBuf::from(raw);
        }
        Ok(())
    }

    /// Reject configurations the daemon cannot start with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device_id.is_empty() {
            return Err(ConfigError::Missing("DOORWARD_DEVICE_ID"));
        }
        if self.backend_url.is_empty() {
            return Err(ConfigError::Missing("DOORWARD_BACKEND_URL"));
        }
        if self.door_secret.is_empty() {
            return Err(ConfigError::Missing("DOORWARD_DOOR_SECRET"));
        }
        if self.controller_poll_hz == 0 {
            return Err(ConfigError::Invalid {
                key: "controller_poll_hz",
                value: "0".into(),
            });
        }
        Ok(())
    }

    pub fn recognition_cooldown(&self) -> Duration {
        Duration::from_secs(self.recognition_cooldown_secs)
    }

    pub fn grant_dwell(&self) -> Duration {
        Duration::from_secs(self.grant_dwell_secs)
    }

    pub fn deny_hold(&self) -> Duration {
        Duration::from_secs(self.deny_hold_secs)
    }

    pub fn controller_poll(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.controller_poll_hz.max(1) as f64)
    }

    pub fn button_debounce(&self) -> Duration {
        Duration::from_secs(self.button_debounce_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn stream_pause(&self) -> Duration {
        Duration::from_secs(self.stream_pause_secs)
    }

    pub fn door_sync_interval(&self) -> Duration {
        Duration::from_secs(self.door_sync_interval_secs)
    }

    pub fn door_sync_backoff(&self) -> Duration {
        Duration::from_secs(self.door_sync_backoff_secs)
    }

    pub fn replay_window(&self) -> Duration {
        Duration::from_secs(self.replay_window_secs)
    }
}

struct Env<'a, F>(&'a F);

impl<F> Env<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str, slot: &mut String) {
        if let Some(v) = (self.0)(key) {
            *slot = v;
        }
    }

    fn parse<T: std::str::FromStr>(&self, key: &'static str, slot: &mut T) -> Result<(), ConfigError> {
        if let Some(raw) = (self.0)(key) {
            *slot = raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid { key, value: raw })?;
        }
        Ok(())
    }
}
