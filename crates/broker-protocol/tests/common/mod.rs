//! Shared fixture for protocol integration tests: an in-memory database
//! seeded with two institutions, a data owner, a schema, and an ACTIVE
//! relationship, plus the signing keys for every party.

use broker_protocol::{
    create_institution, create_relationship, create_request, create_role, create_schema,
    resolve_federated_user, set_relationship_status, transaction_payload, NewInstitution,
    NewRequestInput, NewUser,
};
use broker_types::{DataRequest, DataSchema, Institution, Relationship, RelationshipStatus, User};
use chrono::{DateTime, Duration, Utc};
use ed25519_dalek::SigningKey;
use rusqlite::Connection;
use serde_json::json;

pub const BROKER_AUDIENCE: &str = "trustbroker";

pub struct Fixture {
    pub conn: Connection,
    pub requester: Institution,
    pub requester_key: SigningKey,
    pub provider: Institution,
    pub provider_key: SigningKey,
    pub owner: User,
    pub device_key: SigningKey,
    pub platform_key: SigningKey,
    pub schema: DataSchema,
    pub relationship: Relationship,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_relationship_status(RelationshipStatus::Active)
    }

    pub fn with_relationship_status(status: RelationshipStatus) -> Self {
        let conn = Connection::open_in_memory().expect("in-memory db");
        broker_db::run_migrations(&conn).expect("migrations");

        let now = Utc::now();

        let bank = create_role(&conn, "Bank").expect("role");
        let gov = create_role(&conn, "Government Agency").expect("role");

        let requester_key = broker_crypto::generate_signing_key();
        let requester = create_institution(
            &conn,
            &NewInstitution {
                name: "First Bank".into(),
                role_id: bank.id.clone(),
                public_key: broker_crypto::encode_verifying_key_hex(&requester_key.verifying_key()),
                client_id: "client-first-bank".into(),
                api_endpoint: "https://bank.example".into(),
            },
            now,
        )
        .expect("requester");

        let provider_key = broker_crypto::generate_signing_key();
        let provider = create_institution(
            &conn,
            &NewInstitution {
                name: "Civil Registry".into(),
                role_id: gov.id.clone(),
                public_key: broker_crypto::encode_verifying_key_hex(&provider_key.verifying_key()),
                client_id: "client-civil-registry".into(),
                api_endpoint: "https://registry.example".into(),
            },
            now,
        )
        .expect("provider");

        let device_key = broker_crypto::generate_signing_key();
        let owner = resolve_federated_user(
            &conn,
            &NewUser {
                external_id: "ext-owner-1".into(),
                federated_subject: Some("idp|owner-1".into()),
                device_public_key: broker_crypto::encode_verifying_key_hex(
                    &device_key.verifying_key(),
                ),
                push_token: Some("apns:owner-1".into()),
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

        let relationship =
            create_relationship(&conn, &bank.id, &gov.id, &schema.id, now).expect("relationship");
        set_relationship_status(&conn, &relationship.id, status).expect("relationship status");
        let relationship = Relationship { status, ..relationship };

        Self {
            conn,
            requester,
            requester_key,
            provider,
            provider_key,
            owner,
            device_key,
            platform_key: broker_crypto::generate_signing_key(),
            schema,
            relationship,
        }
    }

    /// Builds a creation input signed by the requester, expiring at `expires_at`.
    pub fn request_input(&self, expires_at: DateTime<Utc>, fields: &[&str]) -> NewRequestInput {
        let payload = json!({
            "requesterId": self.requester.id,
            "providerId": self.provider.id,
            "dataOwnerId": self.owner.id,
            "relationshipId": self.relationship.id,
            "expiresAt": expires_at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        });
        NewRequestInput {
            requester_id: self.requester.id.clone(),
            provider_id: self.provider.id.clone(),
            data_owner_id: self.owner.id.clone(),
            schema_id: self.schema.id.clone(),
            relationship_id: self.relationship.id.clone(),
            requested_fields: fields.iter().map(|f| f.to_string()).collect(),
            expires_at,
            signature: broker_crypto::sign(&payload, &self.requester_key),
        }
    }

    /// Creates a request 30 days out with no field restriction.
    pub fn create_default_request(&self) -> DataRequest {
        create_request(
            &self.conn,
            &self.requester,
            &self.request_input(Utc::now() + Duration::days(30), &[]),
            &self.platform_key,
            Utc::now(),
        )
        .expect("request creation")
    }

    /// A consent token signed by the owner's device.
    pub fn consent_token(&self, jti: &str, consented_fields: Option<&[&str]>) -> String {
        let mut extra = serde_json::Map::new();
        if let Some(fields) = consented_fields {
            extra.insert("consentedFields".into(), json!(fields));
        }
        let claims = broker_tokens::Claims {
            iss: "device:owner-1".into(),
            aud: BROKER_AUDIENCE.into(),
            sub: self.owner.external_id.clone(),
            exp: (Utc::now() + Duration::minutes(5)).timestamp(),
            jti: Some(jti.to_string()),
            extra,
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
