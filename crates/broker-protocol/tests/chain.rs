//! The signature chain: APPROVED -> VERIFIED -> DELIVERED -> COMPLETED.

mod common;

use broker_protocol::{
    approve_consent, get_request, record_delivery, record_receipt, record_verification,
    ProtocolError,
};
use broker_types::{DataRequest, RequestStatus, SignerRole};
use chrono::Utc;
use common::{Fixture, BROKER_AUDIENCE};

fn approved_request(fx: &Fixture) -> DataRequest {
    let request = fx.create_default_request();
    approve_consent(
        &fx.conn,
        &request.id,
        &fx.consent_token(&format!("jti-{}", request.id), None),
        BROKER_AUDIENCE,
        Utc::now(),
    )
    .unwrap()
}

#[test]
fn full_chain_completes_the_transaction() {
    let fx = Fixture::new();
    let request = approved_request(&fx);
    let platform_public = fx.platform_key.verifying_key();

    // Provider confirms requester + platform signatures.
    let verified = record_verification(
        &fx.conn,
        &fx.provider,
        &request.id,
        &platform_public,
        Utc::now(),
    )
    .unwrap();
    assert_eq!(verified.status, RequestStatus::Verified);

    // Provider reports signed delivery with a content hash.
    let provider_sig = fx.chain_signature(&verified, &fx.provider_key);
    let data_hash = broker_crypto::sha256_hex(b"the exchanged payload");
    let delivered = record_delivery(
        &fx.conn,
        &fx.provider,
        &request.id,
        &provider_sig,
        &data_hash,
        Utc::now(),
    )
    .unwrap();
    assert_eq!(delivered.status, RequestStatus::Delivered);
    assert_eq!(delivered.data_hash.as_deref(), Some(data_hash.as_str()));

    // Requester reports signed receipt; all three signatures re-verify.
    let receipt_sig = fx.chain_signature(&delivered, &fx.requester_key);
    let completed = record_receipt(
        &fx.conn,
        &fx.requester,
        &request.id,
        &receipt_sig,
        &platform_public,
        Utc::now(),
    )
    .unwrap();
    assert_eq!(completed.status, RequestStatus::Completed);

    // Append-only log holds exactly one signature per role.
    let signatures = broker_protocol::get_signatures(&fx.conn, &request.id).unwrap();
    let roles: Vec<_> = signatures.iter().map(|s| s.signer_role).collect();
    assert_eq!(
        roles,
        vec![SignerRole::Requester, SignerRole::Platform, SignerRole::Provider]
    );
}

#[test]
fn verification_requires_the_provider_of_record() {
    let fx = Fixture::new();
    let request = approved_request(&fx);

    let err = record_verification(
        &fx.conn,
        &fx.requester,
        &request.id,
        &fx.platform_key.verifying_key(),
        Utc::now(),
    )
    .expect_err("only the provider verifies the requester");
    assert!(matches!(err, ProtocolError::NotParticipant));
}

#[test]
fn verification_from_wrong_state_reports_current_status() {
    let fx = Fixture::new();
    let request = fx.create_default_request();

    let err = record_verification(
        &fx.conn,
        &fx.provider,
        &request.id,
        &fx.platform_key.verifying_key(),
        Utc::now(),
    )
    .expect_err("cannot verify before approval");
    assert!(matches!(
        err,
        ProtocolError::InvalidTransition {
            current: RequestStatus::AwaitingConsent
        }
    ));
}

#[test]
fn tampered_platform_signature_fails_the_request() {
    let fx = Fixture::new();
    let request = approved_request(&fx);

    // Corrupt the stored platform signature.
    fx.conn
        .execute(
            "UPDATE request_signatures SET signature = 'QUFBQQ==' \
             WHERE request_id = ?1 AND signer_role = 'PLATFORM'",
            [&request.id],
        )
        .unwrap();

    let err = record_verification(
        &fx.conn,
        &fx.provider,
        &request.id,
        &fx.platform_key.verifying_key(),
        Utc::now(),
    )
    .expect_err("broken platform signature must reject verification");
    assert!(matches!(err, ProtocolError::InvalidSignature));

    // The chain can never verify again; the request is failed for audit.
    let after = get_request(&fx.conn, &request.id).unwrap();
    assert_eq!(after.status, RequestStatus::Failed);
    assert!(after.failure_reason.is_some());
}

#[test]
fn delivery_with_bad_signature_is_rejected_but_retryable() {
    let fx = Fixture::new();
    let request = approved_request(&fx);
    let platform_public = fx.platform_key.verifying_key();
    let verified = record_verification(
        &fx.conn,
        &fx.provider,
        &request.id,
        &platform_public,
        Utc::now(),
    )
    .unwrap();

    // Signature by the wrong key.
    let wrong_sig = fx.chain_signature(&verified, &fx.requester_key);
    let err = record_delivery(
        &fx.conn,
        &fx.provider,
        &request.id,
        &wrong_sig,
        "deadbeef",
        Utc::now(),
    )
    .expect_err("foreign delivery signature must be rejected");
    assert!(matches!(err, ProtocolError::InvalidSignature));

    // Still VERIFIED: the provider may resubmit correctly.
    assert_eq!(
        get_request(&fx.conn, &request.id).unwrap().status,
        RequestStatus::Verified
    );

    let good_sig = fx.chain_signature(&verified, &fx.provider_key);
    record_delivery(
        &fx.conn,
        &fx.provider,
        &request.id,
        &good_sig,
        "deadbeef",
        Utc::now(),
    )
    .unwrap();
}

#[test]
fn receipt_requires_the_requester_of_record() {
    let fx = Fixture::new();
    let request = approved_request(&fx);
    let platform_public = fx.platform_key.verifying_key();
    let verified = record_verification(
        &fx.conn,
        &fx.provider,
        &request.id,
        &platform_public,
        Utc::now(),
    )
    .unwrap();
    let provider_sig = fx.chain_signature(&verified, &fx.provider_key);
    record_delivery(
        &fx.conn,
        &fx.provider,
        &request.id,
        &provider_sig,
        "deadbeef",
        Utc::now(),
    )
    .unwrap();

    let sig = fx.chain_signature(&verified, &fx.provider_key);
    let err = record_receipt(
        &fx.conn,
        &fx.provider,
        &request.id,
        &sig,
        &platform_public,
        Utc::now(),
    )
    .expect_err("only the requester closes the transaction");
    assert!(matches!(err, ProtocolError::NotParticipant));
}

#[test]
fn completed_request_admits_no_further_transitions() {
    let fx = Fixture::new();
    let request = approved_request(&fx);
    let platform_public = fx.platform_key.verifying_key();
    let verified = record_verification(
        &fx.conn,
        &fx.provider,
        &request.id,
        &platform_public,
        Utc::now(),
    )
    .unwrap();
    let provider_sig = fx.chain_signature(&verified, &fx.provider_key);
    record_delivery(
        &fx.conn,
        &fx.provider,
        &request.id,
        &provider_sig,
        "deadbeef",
        Utc::now(),
    )
    .unwrap();
    let receipt_sig = fx.chain_signature(&verified, &fx.requester_key);
    record_receipt(
        &fx.conn,
        &fx.requester,
        &request.id,
        &receipt_sig,
        &platform_public,
        Utc::now(),
    )
    .unwrap();

    // Replaying the delivery against the completed request fails.
    let err = record_delivery(
        &fx.conn,
        &fx.provider,
        &request.id,
        &provider_sig,
        "deadbeef",
        Utc::now(),
    )
    .expect_err("terminal state admits no transitions");
    assert!(matches!(
        err,
        ProtocolError::InvalidTransition {
            current: RequestStatus::Completed
        }
    ));
}
