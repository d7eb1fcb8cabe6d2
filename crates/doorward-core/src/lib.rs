//! doorward-core: recognition and command primitives for the door controller.
//!
//! Holds the enrolled-face gallery, the recognition gateway that turns a
//! frame into a verdict via an external [`Vision`] capability, and the
//! sealed envelope format used for remote lock/unlock/call commands.

pub mod envelope;
pub mod gallery;
pub mod gateway;
pub mod types;
pub mod vision;

pub use envelope::{Action, CommandKey, CommandPayload, EnvelopeError, OpenedCommand};
pub use gallery::GalleryStore;
pub use gateway::{crop_face, GatewayConfig, RecognitionGateway};
pub use types::{
    CosineMatcher, Detection, Embedding, GalleryEntry, MatchResult, Matcher, RecognitionReason,
    RecognitionResult,
};
pub use vision::{Vision, VisionError};
