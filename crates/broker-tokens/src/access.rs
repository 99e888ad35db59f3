//! Short-lived access-token issuance and introspection.
//!
//! On transition to APPROVED the broker mints a bearer credential scoped to
//! one (requester, provider, owner, schema) tuple, signed with the broker's
//! own key and addressed to the provider. The provider introspects tokens
//! back through the broker before serving data.

use crate::claims::{decode_and_verify, encode, Claims, TokenError};
use chrono::{DateTime, Duration, Utc};
use ed25519_dalek::{SigningKey, VerifyingKey};
use uuid::Uuid;

/// Scope of a minted access token.
#[derive(Debug, Clone)]
pub struct AccessTokenParams {
    pub requester_id: String,
    pub provider_id: String,
    pub data_owner_id: String,
    pub schema_id: String,
    /// Absolute lifetime. Minutes, not hours — the requester is expected to
    /// fetch the data promptly after approval.
    pub ttl: Duration,
}

/// Mints an access token for an approved request.
///
/// The audience claim is the provider's institution id; introspection
/// enforces that only that provider accepts the token.
pub fn issue_access_token(
    issuer: &str,
    params: &AccessTokenParams,
    key: &SigningKey,
    now: DateTime<Utc>,
) -> String {
    let mut extra = serde_json::Map::new();
    extra.insert(
        "requesterId".into(),
        serde_json::Value::String(params.requester_id.clone()),
    );
    extra.insert(
        "schemaId".into(),
        serde_json::Value::String(params.schema_id.clone()),
    );

    let claims = Claims {
        iss: issuer.to_string(),
        aud: params.provider_id.clone(),
        sub: params.data_owner_id.clone(),
        exp: (now + params.ttl).timestamp(),
        jti: Some(Uuid::new_v4().to_string()),
        extra,
    };

    encode(&claims, key)
}

/// Introspects an access token on behalf of the presenting provider.
///
/// Verifies signature and expiry against the broker key, then requires the
/// audience to equal the presenting institution. A token that is valid in
/// general but addressed to a different provider fails with
/// [`TokenError::WrongAudience`] — an authorization failure, not a
/// validity one.
pub fn introspect_access_token(
    token: &str,
    broker_key: &VerifyingKey,
    presenting_institution_id: &str,
    now: DateTime<Utc>,
) -> Result<Claims, TokenError> {
    let claims = decode_and_verify(token, broker_key, now)?;

    if claims.aud != presenting_institution_id {
        return Err(TokenError::WrongAudience);
    }

    Ok(claims)
}
