//! Consent-token and owner-assertion verification.
//!
//! Both are claim-sets signed by the data owner's registered device key.
//! A consent token must carry a `jti`; the caller consumes it atomically
//! against the store. An owner assertion (used for denial) needs no `jti`.

use crate::claims::{decode_and_verify, Claims, TokenError};
use chrono::{DateTime, Utc};
use ed25519_dalek::VerifyingKey;

/// A verified consent token, ready for atomic consumption.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsentToken {
    /// The unique token identifier to record on the approved request.
    pub jti: String,
    /// The owner's external id the device asserted consent for.
    pub subject: String,
    /// Field names the owner consented to, when the device supplied
    /// field-level granularity. `None` means blanket consent.
    pub consented_fields: Option<Vec<String>>,
    /// The full verified claim-set.
    pub claims: Claims,
}

/// Verifies a consent token against the owner's device key.
///
/// Checks, in order: signature and expiry, audience (must equal the broker
/// issuer string — a token minted for another broker is not consent here),
/// subject (must name the data owner of record), and the mandatory `jti`.
///
/// Replay protection is *not* checked here; the store enforces it when the
/// `jti` is recorded.
pub fn verify_consent_token(
    token: &str,
    device_key: &VerifyingKey,
    broker_audience: &str,
    owner_external_id: &str,
    now: DateTime<Utc>,
) -> Result<ConsentToken, TokenError> {
    let claims = decode_and_verify(token, device_key, now)?;

    if claims.aud != broker_audience {
        return Err(TokenError::WrongAudience);
    }
    if claims.sub != owner_external_id {
        return Err(TokenError::WrongSubject);
    }

    let jti = claims.jti.clone().ok_or(TokenError::MissingJti)?;

    let consented_fields = match claims.extra.get("consentedFields") {
        None => None,
        Some(value) => {
            let items = value.as_array().ok_or(TokenError::Malformed)?;
            let fields = items
                .iter()
                .map(|v| v.as_str().map(str::to_string))
                .collect::<Option<Vec<String>>>()
                .ok_or(TokenError::Malformed)?;
            Some(fields)
        }
    };

    Ok(ConsentToken {
        jti,
        subject: claims.sub.clone(),
        consented_fields,
        claims,
    })
}

/// Verifies an owner assertion (e.g. a denial) against the device key.
///
/// Same audience and subject binding as a consent token, but no `jti`
/// requirement: denial is idempotent and needs no replay protection.
pub fn verify_owner_assertion(
    token: &str,
    device_key: &VerifyingKey,
    broker_audience: &str,
    owner_external_id: &str,
    now: DateTime<Utc>,
) -> Result<Claims, TokenError> {
    let claims = decode_and_verify(token, device_key, now)?;

    if claims.aud != broker_audience {
        return Err(TokenError::WrongAudience);
    }
    if claims.sub != owner_external_id {
        return Err(TokenError::WrongSubject);
    }

    Ok(claims)
}
