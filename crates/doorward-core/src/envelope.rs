//! Sealed remote command envelopes.
//!
//! Wire format: URL-safe base64 (no padding) of `nonce(12) ‖ ciphertext‖tag`,
//! AES-256-GCM under `SHA-256(shared secret)`. The plaintext is JSON
//! `{"action": "unlock", "timestamp": <unix seconds>}`.
//!
//! Opening an envelope only proves it was sealed with the shared key; the
//! freshness and single-use checks live with the command channel.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const NONCE_LEN: usize = 12;

#[derive(Error, Debug)]
pub enum EnvelopeError {
    #[error("envelope is not valid base64")]
    Encoding,
    #[error("envelope too short: {0} bytes")]
    TooShort(usize),
    #[error("decryption failed")]
    Decrypt,
    #[error("encryption failed")]
    Encrypt,
    #[error("malformed command payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Remote action carried in an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Lock,
    Unlock,
    Call,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Action::Lock => "lock",
            Action::Unlock => "unlock",
            Action::Call => "call",
        })
    }
}

/// Decrypted command body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandPayload {
    pub action: Action,
    /// Issue time, unix seconds.
    pub timestamp: i64,
}

/// A successfully opened envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedCommand {
    /// Per-envelope nonce; identifies this exact command for replay tracking.
    pub nonce: [u8; NONCE_LEN],
    pub payload: CommandPayload,
}

/// Symmetric key shared between the device and whoever issues commands.
pub struct CommandKey {
    cipher: Aes256Gcm,
}

impl CommandKey {
    /// Derive the AES-256 key from the configured shared secret.
    pub fn from_secret(secret: &str) -> Self {
        let digest = Sha256::digest(secret.as_bytes());
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&digest)),
        }
    }

    /// Encrypt a command under a fresh random nonce.
    pub fn seal(&self, payload: &CommandPayload) -> Result<String, EnvelopeError> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        self.seal_with_nonce(payload, nonce)
    }

    fn seal_with_nonce(
        &self,
        payload: &CommandPayload,
        nonce: [u8; NONCE_LEN],
    ) -> Result<String, EnvelopeError> {
        let plaintext = serde_json::to_vec(payload)?;
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_slice())
            .map_err(|_| EnvelopeError::Encrypt)?;

        let mut wire = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        wire.extend_from_slice(&nonce);
        wire.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(wire))
    }

    /// Decrypt and parse an envelope.
    pub fn open(&self, envelope: &str) -> Result<OpenedCommand, EnvelopeError> {
        let wire = URL_SAFE_NO_PAD
            .decode(envelope.trim().trim_end_matches('='))
            .map_err(|_| EnvelopeError::Encoding)?;
        if wire.len() <= NONCE_LEN {
            return Err(EnvelopeError::TooShort(wire.len()));
        }

        let (nonce_bytes, ciphertext) = wire.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| EnvelopeError::Decrypt)?;
        let payload: CommandPayload = serde_json::from_slice(&plaintext)?;

        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(nonce_bytes);
        Ok(OpenedCommand { nonce, payload })
    }
}

/// Generate a random shared secret suitable for `DOORWARD_DOOR_SECRET`.
pub fn generate_secret() -> String {
    let mut raw = [0u8; 32];
    OsRng.fill_bytes(&mut raw);
    STANDARD.encode(raw)
}
