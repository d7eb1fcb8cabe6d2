//! doorward-hw: hardware abstraction for the door controller.
//!
//! V4L2 camera capture feeding a latest-frame cell, simple on/off/read
//! primitives for the relay, buzzer, indicators, button and display, and
//! the out-of-process telephony agent used for doorbell calls.

pub mod camera;
pub mod frame;
pub mod gpio;
pub mod hardware;
pub mod sim;
pub mod source;
pub mod telephony;

pub use camera::{Camera, CameraError, CaptureDevice, PixelFormat};
pub use frame::{encode_jpeg, Frame, FrameError};
pub use hardware::{Button, Buzzer, Display, Hardware, HardwareError, Indicator, Relay};
pub use source::{FrameSource, LatestFrame};
pub use telephony::{CallAgent, CallError, Linphone};
