//! Device-facing handlers: consent approval and denial.
//!
//! These routes carry their credential in the body — a token signed by the
//! owner's registered device key — so they sit outside the M2M layer.

use axum::extract::{Extension, Json, Path};
use broker_types::DataRequest;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;

use crate::error::{with_conn, ApiError};
use crate::AppState;

/// Request body for consent submission.
#[derive(Debug, Deserialize)]
pub struct ConsentBody {
    #[serde(rename = "consentToken")]
    pub consent_token: String,
}

/// Request body for denial.
#[derive(Debug, Deserialize)]
pub struct DenyBody {
    pub assertion: String,
}

/// Handler for `POST /api/requests/{requestId}/consent`.
pub async fn consent_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(request_id): Path<String>,
    Json(body): Json<ConsentBody>,
) -> Result<Json<DataRequest>, ApiError> {
    let audience = state.issuer.clone();

    let request = with_conn(state.pool.clone(), move |conn| {
        broker_protocol::approve_consent(
            conn,
            &request_id,
            &body.consent_token,
            &audience,
            Utc::now(),
        )
        .map_err(ApiError::from)
    })
    .await?;

    tracing::info!(request_id = %request.id, "consent recorded, request approved");
    Ok(Json(request))
}

/// Handler for `POST /api/requests/{requestId}/deny`.
pub async fn deny_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(request_id): Path<String>,
    Json(body): Json<DenyBody>,
) -> Result<Json<DataRequest>, ApiError> {
    let audience = state.issuer.clone();

    let request = with_conn(state.pool.clone(), move |conn| {
        broker_protocol::deny_request(conn, &request_id, &body.assertion, &audience, Utc::now())
            .map_err(ApiError::from)
    })
    .await?;

    tracing::info!(request_id = %request.id, "request denied by data owner");
    Ok(Json(request))
}
