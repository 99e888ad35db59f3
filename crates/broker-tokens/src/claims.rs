//! Claim-set encoding and verification.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use ed25519_dalek::{SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced by claim-set verification.
///
/// External callers only ever see "unauthorized" for any of these; the
/// distinctions exist for logging and for tests.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,
    #[error("token signature verification failed")]
    BadSignature,
    #[error("token expired")]
    Expired,
    #[error("token missing jti claim")]
    MissingJti,
    #[error("token not addressed to this audience")]
    WrongAudience,
    #[error("token subject mismatch")]
    WrongSubject,
}

/// The standard claim-set. Unknown claims are preserved in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Issuer.
    pub iss: String,
    /// Intended audience.
    pub aud: String,
    /// Subject the claims are about.
    pub sub: String,
    /// Expiration, unix seconds.
    pub exp: i64,
    /// Unique token identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    /// Additional claims (e.g. `consentedFields`, `requestId`).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Claims {
    /// Reads a string-valued extra claim.
    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(|v| v.as_str())
    }
}

/// Encodes and signs a claim-set.
///
/// The signature covers the canonical JSON bytes of the claims, so two
/// parties that construct logically-equal claim-sets produce the same
/// signed bytes.
pub fn encode(claims: &Claims, key: &SigningKey) -> String {
    // Claims are a plain serializable struct; serialization cannot fail.
    let value = serde_json::to_value(claims).unwrap_or_default();
    let body = broker_crypto::canonicalize(&value);
    let signature = broker_crypto::sign_bytes(&body, key);

    format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(&body),
        URL_SAFE_NO_PAD.encode(signature.as_bytes())
    )
}

/// Decodes a claim-set and verifies its signature and expiry.
///
/// The signature is checked over the exact bytes the issuer signed (the
/// decoded first segment), so no re-canonicalization ambiguity exists.
///
/// # Errors
///
/// [`TokenError::Malformed`] for structural problems,
/// [`TokenError::BadSignature`] when the signature does not verify, and
/// [`TokenError::Expired`] when `exp` is not in the future at `now`.
pub fn decode_and_verify(
    token: &str,
    key: &VerifyingKey,
    now: DateTime<Utc>,
) -> Result<Claims, TokenError> {
    let (body_b64, sig_b64) = token.split_once('.').ok_or(TokenError::Malformed)?;

    let body = URL_SAFE_NO_PAD
        .decode(body_b64)
        .map_err(|_| TokenError::Malformed)?;
    let sig_inner = URL_SAFE_NO_PAD
        .decode(sig_b64)
        .map_err(|_| TokenError::Malformed)?;
    let signature_b64 = String::from_utf8(sig_inner).map_err(|_| TokenError::Malformed)?;

    if !broker_crypto::verify_bytes(&body, &signature_b64, key) {
        return Err(TokenError::BadSignature);
    }

    let claims: Claims = serde_json::from_slice(&body).map_err(|_| TokenError::Malformed)?;

    if claims.exp <= now.timestamp() {
        return Err(TokenError::Expired);
    }

    Ok(claims)
}
