//! Shared types, status enums, and constants for the trustbroker platform.
//!
//! This crate provides the foundational domain types used across all broker
//! crates: network participants (institutions, roles), data contracts,
//! authorization relationships, and the data-request transaction record
//! itself. Per-crate error enums live next to the code that produces them;
//! only the types every plane needs are defined here.
//!
//! No crate in the workspace depends on anything *except* `broker-types` for
//! cross-cutting type definitions. This keeps the dependency graph clean and
//! prevents circular dependencies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

mod status;

pub use status::{InstitutionStatus, RelationshipStatus, RequestStatus, SignerRole};

/// A network participant: a bank, agency, or other organization that can
/// act as requester or provider in a data-sharing transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Institution {
    /// Stable identifier (UUID string).
    pub id: String,
    /// Display name.
    pub name: String,
    /// Role this institution belongs to (authorization scoping only).
    #[serde(rename = "roleId")]
    pub role_id: String,
    /// Hex-encoded Ed25519 verifying key used for M2M signatures and the
    /// transaction signature chain.
    #[serde(rename = "publicKey")]
    pub public_key: String,
    /// Client identifier presented in the M2M header.
    #[serde(rename = "clientId")]
    pub client_id: String,
    /// Base URL the requester calls once it holds an access token.
    #[serde(rename = "apiEndpoint")]
    pub api_endpoint: String,
    /// Lifecycle status.
    pub status: InstitutionStatus,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

/// A category of institution (e.g. Bank, Government Agency), used purely
/// for authorization scoping. Many institutions share a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: String,
    pub name: String,
}

/// A named, versioned data contract describing what can be requested.
///
/// Identified by a URN-like string such as `urn:schema:kyc:v1`. The URN and
/// parameter map are immutable once the schema is referenced by a
/// relationship or data request; only the description may change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSchema {
    pub id: String,
    #[serde(rename = "schemaUrn")]
    pub schema_urn: String,
    pub description: String,
    /// Typed parameter map: field name -> type descriptor.
    pub parameters: serde_json::Value,
}

/// An authorization rule: which requester role may ask which provider role
/// for which schema. The (requester role, provider role, schema) triple is
/// unique; a data request may only be created against an ACTIVE relationship.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: String,
    #[serde(rename = "requesterRoleId")]
    pub requester_role_id: String,
    #[serde(rename = "providerRoleId")]
    pub provider_role_id: String,
    #[serde(rename = "schemaId")]
    pub schema_id: String,
    pub status: RelationshipStatus,
}

/// The natural person whose data may be shared (the data owner).
///
/// The registered device public key is what binds a consent token to one
/// physical device: consent signatures verify against this key and nothing
/// else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    /// External identifier (e.g. a national id number or IdP-scoped id).
    #[serde(rename = "externalId")]
    pub external_id: String,
    /// Subject from a federated identity provider, when the user was
    /// resolved through one.
    #[serde(rename = "federatedSubject")]
    pub federated_subject: Option<String>,
    /// Hex-encoded Ed25519 verifying key of the owner's registered device.
    #[serde(rename = "devicePublicKey")]
    pub device_public_key: String,
    /// Push-notification routing handle, when the owner opted in.
    #[serde(rename = "pushToken")]
    pub push_token: Option<String>,
}

/// The transaction record for a single data exchange.
///
/// Never deleted — it is the audit record. `consent_token_jti`, once set, is
/// globally unique across all data requests; this is the replay-protection
/// invariant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRequest {
    pub id: String,
    #[serde(rename = "requesterId")]
    pub requester_id: String,
    #[serde(rename = "providerId")]
    pub provider_id: String,
    #[serde(rename = "dataOwnerId")]
    pub data_owner_id: String,
    #[serde(rename = "schemaId")]
    pub schema_id: String,
    #[serde(rename = "relationshipId")]
    pub relationship_id: String,
    pub status: RequestStatus,
    /// Unique identifier of the consent token that approved this request.
    /// Null until approval; set exactly once.
    #[serde(rename = "consentTokenJti")]
    pub consent_token_jti: Option<String>,
    /// Fields the requester asked for, as an unordered set. Empty means the
    /// whole schema.
    #[serde(rename = "requestedFields")]
    pub requested_fields: Vec<String>,
    #[serde(rename = "expiresAt")]
    pub expires_at: DateTime<Utc>,
    /// Human-readable reason recorded when the request moves to FAILED or
    /// DENIED. Never cleared.
    #[serde(rename = "failureReason")]
    pub failure_reason: Option<String>,
    /// Hash of the delivered payload as reported by the provider. Set once.
    #[serde(rename = "dataHash")]
    pub data_hash: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

impl DataRequest {
    /// Returns true when the given institution is the requester or provider
    /// of record.
    pub fn is_participant(&self, institution_id: &str) -> bool {
        self.requester_id == institution_id || self.provider_id == institution_id
    }
}

/// One entry in the append-only signature log of a data request.
///
/// A request accumulates at most one signature per signer role; entries are
/// never overwritten, only added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSignature {
    #[serde(rename = "requestId")]
    pub request_id: String,
    #[serde(rename = "signerRole")]
    pub signer_role: SignerRole,
    /// Base64-encoded signature over the canonical transaction payload.
    pub signature: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}
