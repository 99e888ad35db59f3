//! Key parsing and generation helpers.
//!
//! Institutions and user devices register hex-encoded Ed25519 verifying
//! keys; the broker's own signing key is loaded from configuration as a
//! hex-encoded 32-byte seed.

use ed25519_dalek::{SigningKey, VerifyingKey};
use thiserror::Error;

/// Errors produced by key parsing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid key hex: {0}")]
    InvalidHex(String),
    #[error("invalid key length: expected 32 bytes, got {0}")]
    InvalidLength(usize),
    #[error("invalid public key point")]
    InvalidPoint,
}

/// Parses a hex-encoded Ed25519 verifying key.
pub fn parse_verifying_key_hex(key_hex: &str) -> Result<VerifyingKey, CryptoError> {
    let bytes = hex::decode(key_hex).map_err(|e| CryptoError::InvalidHex(e.to_string()))?;
    let array: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::InvalidLength(bytes.len()))?;
    VerifyingKey::from_bytes(&array).map_err(|_| CryptoError::InvalidPoint)
}

/// Hex-encodes a verifying key for storage.
pub fn encode_verifying_key_hex(key: &VerifyingKey) -> String {
    hex::encode(key.to_bytes())
}

/// Decodes a hex-encoded 32-byte Ed25519 signing-key seed.
pub fn decode_signing_key_hex(seed_hex: &str) -> Result<SigningKey, CryptoError> {
    let bytes = hex::decode(seed_hex).map_err(|e| CryptoError::InvalidHex(e.to_string()))?;
    let array: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::InvalidLength(bytes.len()))?;
    Ok(SigningKey::from_bytes(&array))
}

/// Generates a fresh signing key from the OS RNG.
pub fn generate_signing_key() -> SigningKey {
    SigningKey::generate(&mut rand::rngs::OsRng)
}
