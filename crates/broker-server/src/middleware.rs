//! Request authentication middleware.
//!
//! Institution-facing routes authenticate machine-to-machine: the caller
//! names itself with `X-Broker-Client-Id` and proves possession of its
//! registered key with `X-Broker-Signature`, an Ed25519 signature over the
//! canonical form of the JSON request body. Admin routes use a shared
//! token instead.

use axum::{
    body::Body,
    http::Request,
    middleware::Next,
    response::Response,
};
use broker_protocol::ProtocolError;
use broker_types::Institution;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::{with_conn, ApiError};
use crate::AppState;

/// Header naming the calling institution.
pub const CLIENT_ID_HEADER: &str = "X-Broker-Client-Id";
/// Header carrying the base64 Ed25519 signature over the canonical body.
pub const SIGNATURE_HEADER: &str = "X-Broker-Signature";
/// Header carrying the shared admin token.
pub const ADMIN_TOKEN_HEADER: &str = "X-Broker-Admin-Token";

/// The authenticated institution, stored in request extensions.
#[derive(Clone, Debug)]
pub struct InstitutionContext(pub Institution);

fn header_string(req: &Request<Body>, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Middleware authenticating institution M2M calls.
///
/// The body is buffered so the signature can be checked against its
/// canonical JSON form, then reconstituted for the handler. A request
/// without a body signs the empty JSON object.
pub async fn m2m_auth_middleware(req: Request<Body>, next: Next) -> Result<Response, ApiError> {
    let (Some(client_id), Some(signature)) = (
        header_string(&req, CLIENT_ID_HEADER),
        header_string(&req, SIGNATURE_HEADER),
    ) else {
        return Err(ProtocolError::MissingCredentials.into());
    };

    let state = req
        .extensions()
        .get::<Arc<AppState>>()
        .cloned()
        .ok_or_else(|| ApiError::Internal("app state missing from extensions".to_string()))?;

    let (parts, body) = req.into_parts();
    let bytes = axum::body::to_bytes(body, crate::MAX_REQUEST_BODY_BYTES)
        .await
        .map_err(|e| ApiError::BadRequest(format!("unreadable request body: {e}")))?;

    let payload: Value = if bytes.is_empty() {
        json!({})
    } else {
        serde_json::from_slice(&bytes)
            .map_err(|_| ApiError::BadRequest("request body must be JSON".to_string()))?
    };

    // Authentication only: possession of the registered key. Whether a
    // PENDING or SUSPENDED institution may act is decided per handler.
    let institution = with_conn(state.pool.clone(), move |conn| {
        broker_protocol::find_institution_by_client_id(conn, &client_id)
            .map_err(ApiError::from)?
            .ok_or_else(|| ProtocolError::UnknownClient.into())
    })
    .await?;

    let key = broker_crypto::parse_verifying_key_hex(&institution.public_key)
        .map_err(|e| ApiError::Internal(format!("stored institution key unusable: {e}")))?;
    if !broker_crypto::verify(&payload, &signature, &key) {
        tracing::debug!(client_id = %institution.client_id, "M2M signature verification failed");
        return Err(ProtocolError::InvalidSignature.into());
    }

    let mut req = Request::from_parts(parts, Body::from(bytes));
    req.extensions_mut().insert(InstitutionContext(institution));

    Ok(next.run(req).await)
}

/// Middleware guarding the admin API with a shared token.
///
/// When no admin token is configured, every admin call is rejected.
pub async fn admin_auth_middleware(req: Request<Body>, next: Next) -> Result<Response, ApiError> {
    let state = req
        .extensions()
        .get::<Arc<AppState>>()
        .cloned()
        .ok_or_else(|| ApiError::Internal("app state missing from extensions".to_string()))?;

    let expected = state.admin_token.as_deref().ok_or(ApiError::Unauthorized)?;
    let presented = header_string(&req, ADMIN_TOKEN_HEADER)
        .ok_or_else(|| ApiError::from(ProtocolError::MissingCredentials))?;

    if !constant_time_eq(presented.as_bytes(), expected.as_bytes()) {
        return Err(ApiError::Unauthorized);
    }

    Ok(next.run(req).await)
}

/// Length-guarded constant-time byte comparison for the admin token.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_matches_equal_inputs() {
        assert!(constant_time_eq(b"secret", b"secret"));
        assert!(!constant_time_eq(b"secret", b"secreT"));
        assert!(!constant_time_eq(b"secret", b"secret2"));
        assert!(!constant_time_eq(b"", b"secret"));
        assert!(constant_time_eq(b"", b""));
    }
}
