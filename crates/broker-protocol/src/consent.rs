//! Consent handling: approval with replay protection, and denial.

use crate::requests::{approve_with_jti, expire_if_due, fail_request, get_request};
use crate::store::get_user;
use crate::ProtocolError;
use broker_tokens::{verify_consent_token, verify_owner_assertion};
use broker_types::{DataRequest, RequestStatus};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::collections::HashSet;

/// Approves a request with a consent token from the owner's device.
///
/// Order of checks follows the protocol: the request must still be awaiting
/// consent and unexpired; the token must verify against the owner's
/// registered device key and carry a `jti`; field-level consent, when the
/// device supplies it, must match the requested field set exactly as
/// unordered sets; and finally the `jti` is recorded and the status flipped
/// in one atomic write, so two concurrent submissions of the same token
/// cannot both succeed.
pub fn approve_consent(
    conn: &Connection,
    request_id: &str,
    consent_token: &str,
    broker_audience: &str,
    now: DateTime<Utc>,
) -> Result<DataRequest, ProtocolError> {
    let request = expire_if_due(conn, get_request(conn, request_id)?, now)?;

    if request.status == RequestStatus::Expired {
        return Err(ProtocolError::Expired);
    }
    if request.status != RequestStatus::AwaitingConsent {
        return Err(ProtocolError::InvalidTransition {
            current: request.status,
        });
    }

    let owner = get_user(conn, &request.data_owner_id)?;
    let device_key = broker_crypto::parse_verifying_key_hex(&owner.device_public_key)?;

    let consent = verify_consent_token(
        consent_token,
        &device_key,
        broker_audience,
        &owner.external_id,
        now,
    )?;

    // Field-level consent: a mismatch aborts the request rather than
    // silently approving a subset.
    if let Some(consented) = &consent.consented_fields {
        if !request.requested_fields.is_empty() {
            let requested: HashSet<&str> =
                request.requested_fields.iter().map(String::as_str).collect();
            let granted: HashSet<&str> = consented.iter().map(String::as_str).collect();
            if requested != granted {
                fail_request(
                    conn,
                    request_id,
                    "consented field set does not match requested field set",
                    now,
                )?;
                return Err(ProtocolError::Validation(
                    "consented fields do not match the requested fields".into(),
                ));
            }
        }
    }

    approve_with_jti(conn, request_id, &consent.jti, now)?;
    get_request(conn, request_id)
}

/// Denies a request on behalf of the data owner.
///
/// The denial is a device-signed assertion bound to the owner of record;
/// no `jti` is consumed (denial is idempotent in effect — a second denial
/// of an already-denied request simply reports the terminal state).
pub fn deny_request(
    conn: &Connection,
    request_id: &str,
    assertion_token: &str,
    broker_audience: &str,
    now: DateTime<Utc>,
) -> Result<DataRequest, ProtocolError> {
    let request = expire_if_due(conn, get_request(conn, request_id)?, now)?;

    if request.status == RequestStatus::Expired {
        return Err(ProtocolError::Expired);
    }
    if request.status != RequestStatus::AwaitingConsent {
        return Err(ProtocolError::InvalidTransition {
            current: request.status,
        });
    }

    let owner = get_user(conn, &request.data_owner_id)?;
    let device_key = broker_crypto::parse_verifying_key_hex(&owner.device_public_key)?;

    verify_owner_assertion(
        assertion_token,
        &device_key,
        broker_audience,
        &owner.external_id,
        now,
    )?;

    crate::requests::cas_status(
        conn,
        request_id,
        RequestStatus::AwaitingConsent,
        RequestStatus::Denied,
        Some("denied by data owner"),
        now,
    )?;
    get_request(conn, request_id)
}
