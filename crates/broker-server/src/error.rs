//! API error type mapping protocol failures to HTTP status codes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use broker_protocol::ProtocolError;
use thiserror::Error;

/// Errors surfaced to HTTP callers.
///
/// Authentication and authorization failures are opaque on the wire: the
/// body never reveals whether the client id, the signature, or the
/// permission check failed.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("invalid input: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("gone: {0}")]
    Gone(String),
    #[error("internal server error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized".to_string()),
            ApiError::Forbidden => (StatusCode::FORBIDDEN, "forbidden".to_string()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Gone(msg) => (StatusCode::GONE, msg),
            ApiError::Internal(msg) => {
                // Internal detail stays in the log, not on the wire.
                tracing::error!(error = %msg, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };

        let body = Json(serde_json::json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<ProtocolError> for ApiError {
    fn from(err: ProtocolError) -> Self {
        if err.is_authentication() {
            tracing::debug!(error = %err, "authentication failure");
            return ApiError::Unauthorized;
        }
        if err.is_authorization() {
            tracing::debug!(error = %err, "authorization failure");
            return ApiError::Forbidden;
        }
        match err {
            ProtocolError::Validation(msg) => ApiError::BadRequest(msg),
            ProtocolError::InvalidTransition { .. } => ApiError::Conflict(err.to_string()),
            ProtocolError::TokenAlreadyUsed => ApiError::Conflict(err.to_string()),
            ProtocolError::Expired => ApiError::Gone(err.to_string()),
            ProtocolError::NotFound(what) => ApiError::NotFound(format!("{what} not found")),
            ProtocolError::Token(_) => ApiError::Unauthorized,
            ProtocolError::Key(e) => ApiError::BadRequest(e.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

/// Runs a closure against a pooled connection on the blocking thread pool.
///
/// Every handler funnels its database work through here so rusqlite never
/// blocks a runtime worker.
pub async fn with_conn<T, F>(pool: broker_db::DbPool, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&rusqlite::Connection) -> Result<T, ApiError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let conn = pool
            .get()
            .map_err(|e| ApiError::Internal(format!("db connection failed: {e}")))?;
        f(&conn)
    })
    .await
    .map_err(|e| ApiError::Internal(format!("task join error: {e}")))?
}
