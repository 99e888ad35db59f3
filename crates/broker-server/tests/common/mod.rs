//! Shared fixture for server integration tests: a temp-file database
//! seeded with two ACTIVE institutions, a data owner, a schema, and an
//! ACTIVE relationship, wrapped in a ready-to-call router.

#![allow(dead_code)]

use axum::body::Body;
use axum::http::{header, Method, Request, Response};
use axum::Router;
use broker_protocol::{
    create_institution, create_relationship, create_role, create_schema, resolve_federated_user,
    set_institution_status, set_relationship_status, transaction_payload, NewInstitution, NewUser,
};
use broker_server::AppState;
use broker_types::{
    DataRequest, DataSchema, Institution, InstitutionStatus, Relationship, RelationshipStatus,
    Role, User,
};
use chrono::{DateTime, Duration, Utc};
use ed25519_dalek::SigningKey;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;

pub const BROKER_AUDIENCE: &str = "trustbroker";
pub const ADMIN_TOKEN: &str = "test-admin-token";

pub struct ServerFixture {
    pub app: Router,
    pub state: AppState,
    pub bank_role: Role,
    pub gov_role: Role,
    pub requester: Institution,
    pub requester_key: SigningKey,
    pub provider: Institution,
    pub provider_key: SigningKey,
    pub owner: User,
    pub device_key: SigningKey,
    pub schema: DataSchema,
    pub relationship: Relationship,
    _tmp: TempDir,
}

impl ServerFixture {
    pub fn new() -> Self {
        let tmp = TempDir::new().expect("temp dir");
        let db_path = tmp.path().join("broker.db");
        let pool = broker_db::create_pool(
            db_path.to_str().expect("utf-8 path"),
            broker_db::PoolSettings::default(),
        )
        .expect("pool");

        let conn = pool.get().expect("conn");
        broker_db::run_migrations(&conn).expect("migrations");

        let now = Utc::now();
        let bank_role = create_role(&conn, "Bank").expect("role");
        let gov_role = create_role(&conn, "Government Agency").expect("role");

        let requester_key = broker_crypto::generate_signing_key();
        let requester = create_institution(
            &conn,
            &NewInstitution {
                name: "First Bank".into(),
                role_id: bank_role.id.clone(),
                public_key: broker_crypto::encode_verifying_key_hex(&requester_key.verifying_key()),
                client_id: "client-first-bank".into(),
                api_endpoint: "https://bank.example".into(),
            },
            now,
        )
        .expect("requester");
        set_institution_status(&conn, &requester.id, InstitutionStatus::Active).expect("activate");

        let provider_key = broker_crypto::generate_signing_key();
        let provider = create_institution(
            &conn,
            &NewInstitution {
                name: "Civil Registry".into(),
                role_id: gov_role.id.clone(),
                public_key: broker_crypto::encode_verifying_key_hex(&provider_key.verifying_key()),
                client_id: "client-civil-registry".into(),
                api_endpoint: "https://registry.example".into(),
            },
            now,
        )
        .expect("provider");
        set_institution_status(&conn, &provider.id, InstitutionStatus::Active).expect("activate");

        let device_key = broker_crypto::generate_signing_key();
        let owner = resolve_federated_user(
            &conn,
            &NewUser {
                external_id: "ext-owner-1".into(),
                federated_subject: Some("idp|owner-1".into()),
                device_public_key: broker_crypto::encode_verifying_key_hex(
                    &device_key.verifying_key(),
                ),
                push_token: None,
            },
            now,
        )
        .expect("owner");

        let schema = create_schema(
            &conn,
            "urn:schema:kyc:v1",
            "Know-your-customer core attributes",
            &json!({"name": "string", "dob": "date", "address": "string"}),
        )
        .expect("schema");

        let relationship = create_relationship(&conn, &bank_role.id, &gov_role.id, &schema.id, now)
            .expect("relationship");
        set_relationship_status(&conn, &relationship.id, RelationshipStatus::Active)
            .expect("relationship status");
        drop(conn);

        let state = AppState {
            pool,
            signing_key: Arc::new(broker_crypto::generate_signing_key()),
            issuer: BROKER_AUDIENCE.into(),
            public_url: "http://localhost:3000".into(),
            access_token_ttl: Duration::minutes(15),
            admin_token: Some(ADMIN_TOKEN.into()),
            notifier: None,
        };
        let app = broker_server::app(state.clone());

        Self {
            app,
            state,
            bank_role,
            gov_role,
            requester,
            requester_key,
            provider,
            provider_key,
            owner,
            device_key,
            schema,
            relationship,
            _tmp: tmp,
        }
    }

    /// A fixture whose admin API is unconfigured.
    pub fn without_admin_token() -> Self {
        let mut fx = Self::new();
        fx.state.admin_token = None;
        fx.app = broker_server::app(fx.state.clone());
        fx
    }

    /// An M2M request: the body is signed over its canonical JSON form.
    pub fn m2m_request(
        &self,
        method: Method,
        uri: &str,
        client_id: &str,
        key: &SigningKey,
        body: &Value,
    ) -> Request<Body> {
        let signature = broker_crypto::sign(body, key);
        let bytes = if *body == json!({}) {
            Vec::new()
        } else {
            serde_json::to_vec(body).expect("serialize body")
        };
        Request::builder()
            .method(method)
            .uri(uri)
            .header("X-Broker-Client-Id", client_id)
            .header("X-Broker-Signature", signature)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(bytes))
            .expect("request")
    }

    /// An unauthenticated JSON request (device and public routes).
    pub fn json_request(&self, method: Method, uri: &str, body: &Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(body).expect("serialize body")))
            .expect("request")
    }

    /// An admin request carrying the shared token.
    pub fn admin_request(&self, method: Method, uri: &str, body: &Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("X-Broker-Admin-Token", ADMIN_TOKEN)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(body).expect("serialize body")))
            .expect("request")
    }

    /// Creation body for a request against the seeded relationship, signed
    /// by the requester.
    pub fn create_body(&self, expires_at: DateTime<Utc>, fields: &[&str]) -> Value {
        let expires = expires_at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        let payload = json!({
            "requesterId": self.requester.id,
            "providerId": self.provider.id,
            "dataOwnerId": self.owner.id,
            "relationshipId": self.relationship.id,
            "expiresAt": expires,
        });
        json!({
            "requesterId": self.requester.id,
            "providerId": self.provider.id,
            "dataOwnerId": self.owner.id,
            "schemaId": self.schema.id,
            "relationshipId": self.relationship.id,
            "requestedFields": fields,
            "expiresAt": expires,
            "signature": broker_crypto::sign(&payload, &self.requester_key),
        })
    }

    /// A consent token signed by the owner's device.
    pub fn consent_token(&self, jti: &str) -> String {
        let claims = broker_tokens::Claims {
            iss: "device:owner-1".into(),
            aud: BROKER_AUDIENCE.into(),
            sub: self.owner.external_id.clone(),
            exp: (Utc::now() + Duration::minutes(5)).timestamp(),
            jti: Some(jti.to_string()),
            extra: serde_json::Map::new(),
        };
        broker_tokens::encode(&claims, &self.device_key)
    }

    /// A device-signed denial assertion.
    pub fn denial_token(&self) -> String {
        let claims = broker_tokens::Claims {
            iss: "device:owner-1".into(),
            aud: BROKER_AUDIENCE.into(),
            sub: self.owner.external_id.clone(),
            exp: (Utc::now() + Duration::minutes(5)).timestamp(),
            jti: None,
            extra: serde_json::Map::new(),
        };
        broker_tokens::encode(&claims, &self.device_key)
    }

    /// Signs the canonical transaction payload of `request` with `key`.
    pub fn chain_signature(&self, request: &DataRequest, key: &SigningKey) -> String {
        broker_crypto::sign(&transaction_payload(request), key)
    }
}

/// Reads a response body as JSON.
pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json body")
}
