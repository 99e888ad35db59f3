//! Signature primitives for the trustbroker platform.
//!
//! Every party in the protocol — requester, broker, provider, and the data
//! owner's device — signs the same structured payloads. Because signer and
//! verifier are different processes that construct the payload
//! independently, signatures are computed over a canonical byte form:
//! JSON with object keys sorted lexicographically and no insignificant
//! whitespace. Two logically-equal payloads canonicalize byte-identically.
//!
//! Signatures are Ed25519; public keys are stored hex-encoded and
//! signatures travel base64-encoded on the wire.

mod canonical;
mod keys;

pub use canonical::canonicalize;
pub use keys::{
    decode_signing_key_hex, encode_verifying_key_hex, generate_signing_key,
    parse_verifying_key_hex, CryptoError,
};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde_json::Value;

/// Signs the canonical form of `payload` and returns a base64 signature.
pub fn sign(payload: &Value, key: &SigningKey) -> String {
    let bytes = canonicalize(payload);
    BASE64.encode(key.sign(&bytes).to_bytes())
}

/// Verifies a base64 signature over the canonical form of `payload`.
///
/// Never fails with an error: malformed base64, wrong-length signatures,
/// and genuine verification failures all return `false`. Side-effect-free
/// and safe to call redundantly.
pub fn verify(payload: &Value, signature_b64: &str, key: &VerifyingKey) -> bool {
    let Ok(sig_bytes) = BASE64.decode(signature_b64) else {
        return false;
    };
    let Ok(sig_array) = <[u8; 64]>::try_from(sig_bytes.as_slice()) else {
        return false;
    };
    let signature = Signature::from_bytes(&sig_array);
    let bytes = canonicalize(payload);
    key.verify(&bytes, &signature).is_ok()
}

/// Signs raw bytes (already-canonical content such as encoded token claims).
pub fn sign_bytes(bytes: &[u8], key: &SigningKey) -> String {
    BASE64.encode(key.sign(bytes).to_bytes())
}

/// Verifies a base64 signature over raw bytes. Same failure semantics as
/// [`verify`].
pub fn verify_bytes(bytes: &[u8], signature_b64: &str, key: &VerifyingKey) -> bool {
    let Ok(sig_bytes) = BASE64.decode(signature_b64) else {
        return false;
    };
    let Ok(sig_array) = <[u8; 64]>::try_from(sig_bytes.as_slice()) else {
        return false;
    };
    key.verify(bytes, &Signature::from_bytes(&sig_array)).is_ok()
}

/// Hex-encoded SHA-256 of arbitrary bytes. Used for delivered-payload
/// content hashes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    hex::encode(Sha256::digest(bytes))
}
