//! The Data Request Trust Protocol.
//!
//! This crate owns the lifecycle of a single data-sharing transaction: the
//! guarded state machine, the relationship authorization check, consent
//! verification with replay protection, and the multi-signature chain that
//! proves after the fact that every party agreed to the same transaction.
//!
//! The broker itself is stateless between requests; every invariant that
//! matters under concurrency is enforced as an atomic conditional write
//! against SQLite (compare-and-swap on the current status, UNIQUE insert on
//! the consent-token identifier) rather than read-then-write application
//! code.

mod chain;
mod consent;
mod create;
mod machine;
mod requests;
mod store;

pub use chain::{record_delivery, record_receipt, record_verification, transaction_payload};
pub use consent::{approve_consent, deny_request};
pub use create::{create_request, NewRequestInput};
pub use machine::is_valid_transition;
pub use requests::{expire_if_due, fail_request, get_request, sweep_expired};
pub use store::{
    create_institution, create_relationship, create_role, create_schema, delete_relationship,
    find_active_relationship, find_institution_by_client_id, find_user_by_external_id,
    get_institution, get_relationship, get_role, get_schema, get_signatures, get_user,
    list_relationships, resolve_federated_user, rotate_institution_key, set_institution_status,
    set_relationship_status, update_schema_description, NewInstitution, NewUser,
};

use broker_types::RequestStatus;
use thiserror::Error;

/// The protocol error taxonomy.
///
/// Authentication and authorization variants are collapsed to an opaque
/// "unauthorized" before they reach an external caller; state and
/// validation variants are safe to surface verbatim since they describe
/// protocol usage, not security boundaries.
#[derive(Debug, Error)]
pub enum ProtocolError {
    // Authentication: the caller could not be identified.
    #[error("missing credentials")]
    MissingCredentials,
    #[error("unknown client")]
    UnknownClient,
    #[error("invalid signature")]
    InvalidSignature,

    // Authorization: identified, but not permitted.
    #[error("no active relationship covers the requested exchange")]
    NoActiveRelationship,
    #[error("caller is not a participant in this request")]
    NotParticipant,
    #[error("token not addressed to this audience")]
    WrongAudience,
    #[error("relationship is referenced by existing data requests")]
    RelationshipInUse,

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("invalid transition: request is {}", current.as_str())]
    InvalidTransition { current: RequestStatus },

    #[error("consent token already used")]
    TokenAlreadyUsed,

    #[error("request expired")]
    Expired,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("token rejected: {0}")]
    Token(#[from] broker_tokens::TokenError),

    #[error("key error: {0}")]
    Key(#[from] broker_crypto::CryptoError),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
}

impl ProtocolError {
    /// True for failures where the caller could not be authenticated at all.
    pub fn is_authentication(&self) -> bool {
        matches!(
            self,
            Self::MissingCredentials | Self::UnknownClient | Self::InvalidSignature
        )
    }

    /// True for failures where an authenticated caller lacked permission.
    pub fn is_authorization(&self) -> bool {
        matches!(
            self,
            Self::NoActiveRelationship
                | Self::NotParticipant
                | Self::WrongAudience
                | Self::RelationshipInUse
        )
    }
}
