//! Status enums and their wire/database codecs.
//!
//! Every enum here serializes to the SCREAMING_SNAKE_CASE code used both in
//! JSON responses and in the database, so the two can never drift.

use serde::{Deserialize, Serialize};

/// Lifecycle status of an institution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstitutionStatus {
    /// Onboarded but not yet cleared to transact.
    Pending,
    /// May act as requester or provider.
    Active,
    /// Temporarily barred from transacting.
    Suspended,
}

impl InstitutionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Active => "ACTIVE",
            Self::Suspended => "SUSPENDED",
        }
    }

    pub fn parse(code: &str) -> Option<Self> {
        match code {
            "PENDING" => Some(Self::Pending),
            "ACTIVE" => Some(Self::Active),
            "SUSPENDED" => Some(Self::Suspended),
            _ => None,
        }
    }
}

/// Status of an authorization relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipStatus {
    Pending,
    Active,
    Rejected,
    Revoked,
}

impl RelationshipStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Active => "ACTIVE",
            Self::Rejected => "REJECTED",
            Self::Revoked => "REVOKED",
        }
    }

    pub fn parse(code: &str) -> Option<Self> {
        match code {
            "PENDING" => Some(Self::Pending),
            "ACTIVE" => Some(Self::Active),
            "REJECTED" => Some(Self::Rejected),
            "REVOKED" => Some(Self::Revoked),
            _ => None,
        }
    }
}

/// Lifecycle status of a data request.
///
/// The happy path is `AwaitingConsent → Approved → Verified → Delivered →
/// Completed`; `Denied`, `Failed`, and `Expired` are side exits reachable
/// from any non-terminal state. No transition leaves a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    /// Pre-persist notional state; a stored request is never in it.
    Initiated,
    AwaitingConsent,
    Approved,
    Verified,
    Delivered,
    Completed,
    Denied,
    Failed,
    Expired,
}

impl RequestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initiated => "INITIATED",
            Self::AwaitingConsent => "AWAITING_CONSENT",
            Self::Approved => "APPROVED",
            Self::Verified => "VERIFIED",
            Self::Delivered => "DELIVERED",
            Self::Completed => "COMPLETED",
            Self::Denied => "DENIED",
            Self::Failed => "FAILED",
            Self::Expired => "EXPIRED",
        }
    }

    pub fn parse(code: &str) -> Option<Self> {
        match code {
            "INITIATED" => Some(Self::Initiated),
            "AWAITING_CONSENT" => Some(Self::AwaitingConsent),
            "APPROVED" => Some(Self::Approved),
            "VERIFIED" => Some(Self::Verified),
            "DELIVERED" => Some(Self::Delivered),
            "COMPLETED" => Some(Self::Completed),
            "DENIED" => Some(Self::Denied),
            "FAILED" => Some(Self::Failed),
            "EXPIRED" => Some(Self::Expired),
            _ => None,
        }
    }

    /// Terminal states admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Denied | Self::Failed | Self::Expired
        )
    }
}

/// Which party a signature in the chain belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignerRole {
    Requester,
    Platform,
    Provider,
}

impl SignerRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Requester => "REQUESTER",
            Self::Platform => "PLATFORM",
            Self::Provider => "PROVIDER",
        }
    }

    pub fn parse(code: &str) -> Option<Self> {
        match code {
            "REQUESTER" => Some(Self::Requester),
            "PLATFORM" => Some(Self::Platform),
            "PROVIDER" => Some(Self::Provider),
            _ => None,
        }
    }
}
