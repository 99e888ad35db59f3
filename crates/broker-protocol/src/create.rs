//! Request creation: the entry edge of the state machine.

use crate::chain::transaction_payload;
use crate::requests::insert_request;
use crate::store::{
    append_signature, find_active_relationship, get_institution, get_relationship, get_schema,
    get_user,
};
use crate::ProtocolError;
use broker_types::{DataRequest, Institution, RequestStatus, SignerRole};
use chrono::{DateTime, Utc};
use ed25519_dalek::SigningKey;
use rusqlite::Connection;
use uuid::Uuid;

/// Creation payload, after the server has authenticated the caller and
/// parsed the body.
#[derive(Debug, Clone)]
pub struct NewRequestInput {
    pub requester_id: String,
    pub provider_id: String,
    pub data_owner_id: String,
    pub schema_id: String,
    pub relationship_id: String,
    pub requested_fields: Vec<String>,
    pub expires_at: DateTime<Utc>,
    /// The requester's signature over the canonical transaction payload
    /// `{requesterId, providerId, dataOwnerId, relationshipId, expiresAt}`.
    pub signature: String,
}

/// Creates a data request, entering the state machine at AWAITING_CONSENT.
///
/// Guards, in order: the authenticated caller is the requester named in the
/// payload; the expiry is in the future; provider, owner, and schema exist;
/// the named relationship is ACTIVE and covers exactly this (requester
/// role, provider role, schema) triple; and the requester's signature over
/// the canonical transaction payload verifies.
///
/// On success the requester's signature is recorded and the broker mints
/// and records its own platform signature over the same payload, so the
/// provider can later confirm both the requester and the broker attest to
/// the transaction.
pub fn create_request(
    conn: &Connection,
    caller: &Institution,
    input: &NewRequestInput,
    platform_key: &SigningKey,
    now: DateTime<Utc>,
) -> Result<DataRequest, ProtocolError> {
    if caller.id != input.requester_id {
        return Err(ProtocolError::NotParticipant);
    }
    if input.expires_at <= now {
        return Err(ProtocolError::Validation(
            "expiresAt must be in the future".into(),
        ));
    }

    let provider = get_institution(conn, &input.provider_id)?;
    let owner = get_user(conn, &input.data_owner_id)?;
    let schema = get_schema(conn, &input.schema_id)?;

    // The relationship named in the payload must be the unique ACTIVE rule
    // for this exact triple. Looking it up by triple (rather than trusting
    // the id) also rejects a stale id from a revoked-and-recreated rule.
    let relationship =
        find_active_relationship(conn, &caller.role_id, &provider.role_id, &schema.id)?
            .ok_or(ProtocolError::NoActiveRelationship)?;
    if relationship.id != input.relationship_id {
        // The named relationship exists but does not authorize this triple.
        // Distinguish a bad id from a merely inactive rule for the caller.
        get_relationship(conn, &input.relationship_id)?;
        return Err(ProtocolError::NoActiveRelationship);
    }

    let request = DataRequest {
        id: Uuid::new_v4().to_string(),
        requester_id: caller.id.clone(),
        provider_id: provider.id.clone(),
        data_owner_id: owner.id.clone(),
        schema_id: schema.id.clone(),
        relationship_id: relationship.id.clone(),
        status: RequestStatus::AwaitingConsent,
        consent_token_jti: None,
        requested_fields: input.requested_fields.clone(),
        expires_at: input.expires_at,
        failure_reason: None,
        data_hash: None,
        created_at: now,
        updated_at: now,
    };

    // Verify the requester signed the transaction it is creating.
    let payload = transaction_payload(&request);
    let requester_key = broker_crypto::parse_verifying_key_hex(&caller.public_key)?;
    if !broker_crypto::verify(&payload, &input.signature, &requester_key) {
        return Err(ProtocolError::InvalidSignature);
    }

    insert_request(conn, &request)?;
    append_signature(conn, &request.id, SignerRole::Requester, &input.signature, now)?;

    let platform_signature = broker_crypto::sign(&payload, platform_key);
    append_signature(
        conn,
        &request.id,
        SignerRole::Platform,
        &platform_signature,
        now,
    )?;

    tracing::info!(
        request_id = request.id,
        requester = caller.id,
        provider = provider.id,
        schema = schema.schema_urn,
        "data request created"
    );

    Ok(request)
}
