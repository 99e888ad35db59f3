//! The multi-signature chain: requester -> platform -> provider -> requester.
//!
//! All four protocol steps sign the *identical* canonical payload. The
//! requester signs at creation; the broker adds its platform signature in
//! the same step; the provider confirms both before serving data; and the
//! closing receipt re-verifies all three against the institutions' stored
//! keys.

use crate::requests::{cas_status, deliver_with_hash, fail_request, get_request};
use crate::store::{append_signature, get_institution, get_signature};
use crate::ProtocolError;
use broker_types::{DataRequest, Institution, RequestStatus, SignerRole};
use chrono::{DateTime, Utc};
use ed25519_dalek::VerifyingKey;
use rusqlite::Connection;
use serde_json::json;

/// The fixed canonical payload every chain signature covers.
///
/// `expiresAt` is normalized to seconds-precision RFC 3339 UTC — the same
/// form the broker stores — so independently constructed payloads
/// canonicalize to identical bytes.
pub fn transaction_payload(request: &DataRequest) -> serde_json::Value {
    json!({
        "requesterId": request.requester_id,
        "providerId": request.provider_id,
        "dataOwnerId": request.data_owner_id,
        "relationshipId": request.relationship_id,
        "expiresAt": request
            .expires_at
            .to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
    })
}

fn institution_key(
    conn: &Connection,
    institution_id: &str,
) -> Result<VerifyingKey, ProtocolError> {
    let institution = get_institution(conn, institution_id)?;
    Ok(broker_crypto::parse_verifying_key_hex(&institution.public_key)?)
}

fn stored_signature(
    conn: &Connection,
    request_id: &str,
    role: SignerRole,
) -> Result<String, ProtocolError> {
    get_signature(conn, request_id, role)?.ok_or(ProtocolError::NotFound("signature"))
}

/// Provider step: confirm the requester and the broker both attest to the
/// transaction. APPROVED -> VERIFIED.
///
/// The requester's and the platform's stored signatures are re-verified
/// against their current public keys. If either fails, the chain can never
/// verify again, so the request moves to FAILED with the reason recorded.
pub fn record_verification(
    conn: &Connection,
    caller: &Institution,
    request_id: &str,
    platform_key: &VerifyingKey,
    now: DateTime<Utc>,
) -> Result<DataRequest, ProtocolError> {
    let request = crate::requests::expire_if_due(conn, get_request(conn, request_id)?, now)?;

    if caller.id != request.provider_id {
        return Err(ProtocolError::NotParticipant);
    }
    if request.status == RequestStatus::Expired {
        return Err(ProtocolError::Expired);
    }
    if request.status != RequestStatus::Approved {
        return Err(ProtocolError::InvalidTransition {
            current: request.status,
        });
    }

    let payload = transaction_payload(&request);

    let requester_sig = stored_signature(conn, request_id, SignerRole::Requester)?;
    let requester_key = institution_key(conn, &request.requester_id)?;
    if !broker_crypto::verify(&payload, &requester_sig, &requester_key) {
        fail_request(conn, request_id, "requester signature failed verification", now)?;
        return Err(ProtocolError::InvalidSignature);
    }

    let platform_sig = stored_signature(conn, request_id, SignerRole::Platform)?;
    if !broker_crypto::verify(&payload, &platform_sig, platform_key) {
        fail_request(conn, request_id, "platform signature failed verification", now)?;
        return Err(ProtocolError::InvalidSignature);
    }

    cas_status(
        conn,
        request_id,
        RequestStatus::Approved,
        RequestStatus::Verified,
        None,
        now,
    )?;
    get_request(conn, request_id)
}

/// Provider step: report signed delivery. VERIFIED -> DELIVERED.
///
/// The submitted provider signature must verify over the canonical payload;
/// a failure rejects the step without failing the request, since the
/// provider can resubmit a correct signature. The content hash is recorded
/// exactly once.
pub fn record_delivery(
    conn: &Connection,
    caller: &Institution,
    request_id: &str,
    provider_signature: &str,
    data_hash: &str,
    now: DateTime<Utc>,
) -> Result<DataRequest, ProtocolError> {
    let request = crate::requests::expire_if_due(conn, get_request(conn, request_id)?, now)?;

    if caller.id != request.provider_id {
        return Err(ProtocolError::NotParticipant);
    }
    if request.status == RequestStatus::Expired {
        return Err(ProtocolError::Expired);
    }
    if request.status != RequestStatus::Verified {
        return Err(ProtocolError::InvalidTransition {
            current: request.status,
        });
    }
    if data_hash.trim().is_empty() {
        return Err(ProtocolError::Validation("dataHash cannot be empty".into()));
    }

    let payload = transaction_payload(&request);
    let provider_key = broker_crypto::parse_verifying_key_hex(&caller.public_key)?;
    if !broker_crypto::verify(&payload, provider_signature, &provider_key) {
        return Err(ProtocolError::InvalidSignature);
    }

    append_signature(conn, request_id, SignerRole::Provider, provider_signature, now)?;
    deliver_with_hash(conn, request_id, data_hash, now)?;
    get_request(conn, request_id)
}

/// Requester step: report signed receipt, closing the transaction.
/// DELIVERED -> COMPLETED.
///
/// All three stored signatures must verify against their institutions'
/// public keys over the identical canonical payload. A stored-signature
/// failure at this point is unrecoverable and moves the request to FAILED.
pub fn record_receipt(
    conn: &Connection,
    caller: &Institution,
    request_id: &str,
    receipt_signature: &str,
    platform_key: &VerifyingKey,
    now: DateTime<Utc>,
) -> Result<DataRequest, ProtocolError> {
    let request = crate::requests::expire_if_due(conn, get_request(conn, request_id)?, now)?;

    if caller.id != request.requester_id {
        return Err(ProtocolError::NotParticipant);
    }
    if request.status == RequestStatus::Expired {
        return Err(ProtocolError::Expired);
    }
    if request.status != RequestStatus::Delivered {
        return Err(ProtocolError::InvalidTransition {
            current: request.status,
        });
    }

    let payload = transaction_payload(&request);

    // The receipt itself must be signed by the requester.
    let requester_key = broker_crypto::parse_verifying_key_hex(&caller.public_key)?;
    if !broker_crypto::verify(&payload, receipt_signature, &requester_key) {
        return Err(ProtocolError::InvalidSignature);
    }

    // Full chain check: requester, platform, provider.
    for (role, key) in [
        (SignerRole::Requester, requester_key),
        (SignerRole::Platform, *platform_key),
        (
            SignerRole::Provider,
            institution_key(conn, &request.provider_id)?,
        ),
    ] {
        let signature = stored_signature(conn, request_id, role)?;
        if !broker_crypto::verify(&payload, &signature, &key) {
            let reason = format!("{} signature failed final verification", role.as_str());
            fail_request(conn, request_id, &reason, now)?;
            return Err(ProtocolError::InvalidSignature);
        }
    }

    cas_status(
        conn,
        request_id,
        RequestStatus::Delivered,
        RequestStatus::Completed,
        None,
        now,
    )?;

    tracing::info!(request_id, "signature chain closed, transaction completed");
    get_request(conn, request_id)
}
