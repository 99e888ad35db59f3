//! Consent verification, replay protection, and field-level matching.

mod common;

use broker_protocol::{approve_consent, get_request, ProtocolError};
use broker_types::RequestStatus;
use chrono::Utc;
use common::{Fixture, BROKER_AUDIENCE};

#[test]
fn fresh_consent_token_approves_the_request() {
    let fx = Fixture::new();
    let request = fx.create_default_request();

    let approved = approve_consent(
        &fx.conn,
        &request.id,
        &fx.consent_token("jti-fresh", None),
        BROKER_AUDIENCE,
        Utc::now(),
    )
    .unwrap();

    assert_eq!(approved.status, RequestStatus::Approved);
    assert_eq!(approved.consent_token_jti.as_deref(), Some("jti-fresh"));
}

#[test]
fn replayed_token_is_rejected_even_for_a_different_request() {
    let fx = Fixture::new();
    let first = fx.create_default_request();
    let second = fx.create_default_request();

    let token = fx.consent_token("jti-once", None);
    approve_consent(&fx.conn, &first.id, &token, BROKER_AUDIENCE, Utc::now()).unwrap();

    // The identical token against a *different* request must be rejected:
    // jti uniqueness spans the whole store, not a single request.
    let err = approve_consent(&fx.conn, &second.id, &token, BROKER_AUDIENCE, Utc::now())
        .expect_err("replayed jti must be rejected");
    assert!(matches!(err, ProtocolError::TokenAlreadyUsed));

    // The second request is untouched and can still be approved freshly.
    let second_now = get_request(&fx.conn, &second.id).unwrap();
    assert_eq!(second_now.status, RequestStatus::AwaitingConsent);
    assert_eq!(second_now.consent_token_jti, None);

    approve_consent(
        &fx.conn,
        &second.id,
        &fx.consent_token("jti-other", None),
        BROKER_AUDIENCE,
        Utc::now(),
    )
    .unwrap();
}

#[test]
fn double_submission_against_the_same_request_fails_second_time() {
    let fx = Fixture::new();
    let request = fx.create_default_request();

    let token = fx.consent_token("jti-dup", None);
    approve_consent(&fx.conn, &request.id, &token, BROKER_AUDIENCE, Utc::now()).unwrap();

    // Request is already APPROVED, so the state guard fires first.
    let err = approve_consent(&fx.conn, &request.id, &token, BROKER_AUDIENCE, Utc::now())
        .expect_err("second submission must fail");
    assert!(matches!(
        err,
        ProtocolError::InvalidTransition {
            current: RequestStatus::Approved
        }
    ));
}

#[test]
fn consent_token_without_jti_is_rejected() {
    let fx = Fixture::new();
    let request = fx.create_default_request();

    let claims = broker_tokens::Claims {
        iss: "device:owner-1".into(),
        aud: BROKER_AUDIENCE.into(),
        sub: fx.owner.external_id.clone(),
        exp: (Utc::now() + chrono::Duration::minutes(5)).timestamp(),
        jti: None,
        extra: serde_json::Map::new(),
    };
    let token = broker_tokens::encode(&claims, &fx.device_key);

    let err = approve_consent(&fx.conn, &request.id, &token, BROKER_AUDIENCE, Utc::now())
        .expect_err("jti is mandatory for consent");
    assert!(matches!(
        err,
        ProtocolError::Token(broker_tokens::TokenError::MissingJti)
    ));
}

#[test]
fn consent_from_a_foreign_device_is_rejected() {
    let fx = Fixture::new();
    let request = fx.create_default_request();

    let impostor = broker_crypto::generate_signing_key();
    let claims = broker_tokens::Claims {
        iss: "device:impostor".into(),
        aud: BROKER_AUDIENCE.into(),
        sub: fx.owner.external_id.clone(),
        exp: (Utc::now() + chrono::Duration::minutes(5)).timestamp(),
        jti: Some("jti-forged".into()),
        extra: serde_json::Map::new(),
    };
    let token = broker_tokens::encode(&claims, &impostor);

    let err = approve_consent(&fx.conn, &request.id, &token, BROKER_AUDIENCE, Utc::now())
        .expect_err("consent must verify against the registered device key");
    assert!(matches!(
        err,
        ProtocolError::Token(broker_tokens::TokenError::BadSignature)
    ));
}

#[test]
fn matching_field_sets_compare_as_unordered_sets() {
    let fx = Fixture::new();
    let input = fx.request_input(Utc::now() + chrono::Duration::days(30), &["name", "dob"]);
    let request = broker_protocol::create_request(
        &fx.conn,
        &fx.requester,
        &input,
        &fx.platform_key,
        Utc::now(),
    )
    .unwrap();

    // Same fields, different order.
    let approved = approve_consent(
        &fx.conn,
        &request.id,
        &fx.consent_token("jti-fields", Some(&["dob", "name"])),
        BROKER_AUDIENCE,
        Utc::now(),
    )
    .unwrap();
    assert_eq!(approved.status, RequestStatus::Approved);
}

#[test]
fn field_subset_consent_aborts_the_request_into_failed() {
    let fx = Fixture::new();
    let input = fx.request_input(Utc::now() + chrono::Duration::days(30), &["name", "dob"]);
    let request = broker_protocol::create_request(
        &fx.conn,
        &fx.requester,
        &input,
        &fx.platform_key,
        Utc::now(),
    )
    .unwrap();

    let err = approve_consent(
        &fx.conn,
        &request.id,
        &fx.consent_token("jti-subset", Some(&["name"])),
        BROKER_AUDIENCE,
        Utc::now(),
    )
    .expect_err("a consent subset must not silently approve");
    assert!(matches!(err, ProtocolError::Validation(_)));

    // The mismatch aborts the request rather than leaving it pending.
    let after = get_request(&fx.conn, &request.id).unwrap();
    assert_eq!(after.status, RequestStatus::Failed);
    assert!(after
        .failure_reason
        .as_deref()
        .unwrap()
        .contains("field set"));
}

#[test]
fn blanket_consent_skips_the_field_check() {
    let fx = Fixture::new();
    let input = fx.request_input(Utc::now() + chrono::Duration::days(30), &["name", "dob"]);
    let request = broker_protocol::create_request(
        &fx.conn,
        &fx.requester,
        &input,
        &fx.platform_key,
        Utc::now(),
    )
    .unwrap();

    let approved = approve_consent(
        &fx.conn,
        &request.id,
        &fx.consent_token("jti-blanket", None),
        BROKER_AUDIENCE,
        Utc::now(),
    )
    .unwrap();
    assert_eq!(approved.status, RequestStatus::Approved);
}
