//! Institution-facing handlers: the data-request lifecycle and token
//! introspection.

use axum::{
    extract::{Extension, Json, Path},
    http::StatusCode,
};
use broker_tokens::{AccessTokenParams, TokenError};
use broker_types::{DataRequest, Institution, InstitutionStatus, RequestStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::{with_conn, ApiError};
use crate::middleware::InstitutionContext;
use crate::notify::ConsentPrompt;
use crate::AppState;

/// Request body for data-request creation.
#[derive(Debug, Deserialize)]
pub struct CreateRequestBody {
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
    /// Unordered set of requested field names; empty means the whole schema.
    #[serde(rename = "requestedFields", default)]
    pub requested_fields: Vec<String>,
    #[serde(rename = "expiresAt")]
    pub expires_at: DateTime<Utc>,
    /// Requester signature over the canonical transaction payload.
    pub signature: String,
}

/// Request body for signed delivery confirmation.
#[derive(Debug, Deserialize)]
pub struct DeliveryBody {
    pub signature: String,
    #[serde(rename = "dataHash")]
    pub data_hash: String,
}

/// Request body for signed receipt confirmation.
#[derive(Debug, Deserialize)]
pub struct ReceiptBody {
    pub signature: String,
}

/// Request body for token introspection.
#[derive(Debug, Deserialize)]
pub struct IntrospectBody {
    pub token: String,
}

/// Status poll response. Deliberately minimal: the poller already knows the
/// request it created, so only the state (and the failure reason, once one
/// is recorded) comes back. An APPROVED request polled by its requester
/// additionally carries the provider endpoint and a fresh access token.
#[derive(Debug, Serialize)]
pub struct RequestView {
    pub status: RequestStatus,
    #[serde(rename = "failureReason", skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(rename = "providerEndpoint", skip_serializing_if = "Option::is_none")]
    pub provider_endpoint: Option<String>,
    #[serde(rename = "accessToken", skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

/// Only ACTIVE institutions may take part in the transaction lifecycle.
/// The auth middleware checks the key, not the status, so an institution
/// suspended mid-flight still authenticates but is turned away here.
fn require_active(caller: &Institution) -> Result<(), ApiError> {
    if caller.status != InstitutionStatus::Active {
        tracing::debug!(institution = %caller.id, status = ?caller.status,
            "rejecting call from inactive institution");
        return Err(ApiError::Forbidden);
    }
    Ok(())
}

/// Handler for `POST /api/requests`.
pub async fn create_request_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(ctx): Extension<InstitutionContext>,
    Json(body): Json<CreateRequestBody>,
) -> Result<(StatusCode, Json<DataRequest>), ApiError> {
    let caller = ctx.0;
    require_active(&caller)?;
    let signing_key = state.signing_key.clone();
    let requester_name = caller.name.clone();

    let (request, prompt) = with_conn(state.pool.clone(), move |conn| {
        let input = broker_protocol::NewRequestInput {
            requester_id: body.requester_id,
            provider_id: body.provider_id,
            data_owner_id: body.data_owner_id,
            schema_id: body.schema_id,
            relationship_id: body.relationship_id,
            requested_fields: body.requested_fields,
            expires_at: body.expires_at,
            signature: body.signature,
        };
        let request =
            broker_protocol::create_request(conn, &caller, &input, &signing_key, Utc::now())
                .map_err(ApiError::from)?;

        // Best-effort consent prompt; the owner may not have a push handle.
        let owner = broker_protocol::get_user(conn, &request.data_owner_id)
            .map_err(ApiError::from)?;
        let prompt = owner.push_token.map(|device_token| -> Result<_, ApiError> {
            let provider = broker_protocol::get_institution(conn, &request.provider_id)
                .map_err(ApiError::from)?;
            let schema = broker_protocol::get_schema(conn, &request.schema_id)
                .map_err(ApiError::from)?;
            Ok(ConsentPrompt {
                device_token,
                request_id: request.id.clone(),
                requester_name,
                provider_name: provider.name,
                schema_name: schema.schema_urn,
            })
        });
        let prompt = prompt.transpose()?;

        Ok((request, prompt))
    })
    .await?;

    if let (Some(notifier), Some(prompt)) = (&state.notifier, prompt) {
        notifier.dispatch(prompt);
    }

    tracing::info!(request_id = %request.id, "data request created");
    Ok((StatusCode::CREATED, Json(request)))
}

/// Handler for `GET /api/requests/{requestId}`.
///
/// Expiry is applied lazily on read, so a poll after the deadline observes
/// EXPIRED even if the background sweep has not run yet.
pub async fn get_request_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(ctx): Extension<InstitutionContext>,
    Path(request_id): Path<String>,
) -> Result<Json<RequestView>, ApiError> {
    let caller = ctx.0;
    require_active(&caller)?;
    let signing_key = state.signing_key.clone();
    let issuer = state.issuer.clone();
    let ttl = state.access_token_ttl;

    let view = with_conn(state.pool.clone(), move |conn| {
        let request = broker_protocol::get_request(conn, &request_id).map_err(ApiError::from)?;
        let request =
            broker_protocol::expire_if_due(conn, request, Utc::now()).map_err(ApiError::from)?;

        if !request.is_participant(&caller.id) {
            return Err(broker_protocol::ProtocolError::NotParticipant.into());
        }

        // The requester polling an approved request gets everything it
        // needs to fetch the data: where to go and a fresh credential.
        let mut view = RequestView {
            status: request.status,
            failure_reason: request.failure_reason.clone(),
            provider_endpoint: None,
            access_token: None,
        };
        if request.status == RequestStatus::Approved && caller.id == request.requester_id {
            let provider = broker_protocol::get_institution(conn, &request.provider_id)
                .map_err(ApiError::from)?;
            view.provider_endpoint = Some(provider.api_endpoint);
            view.access_token = Some(broker_tokens::issue_access_token(
                &issuer,
                &AccessTokenParams {
                    requester_id: request.requester_id.clone(),
                    provider_id: request.provider_id.clone(),
                    data_owner_id: request.data_owner_id.clone(),
                    schema_id: request.schema_id.clone(),
                    ttl,
                },
                &signing_key,
                Utc::now(),
            ));
        }
        Ok(view)
    })
    .await?;

    Ok(Json(view))
}

/// Handler for `POST /api/requests/{requestId}/verify`.
pub async fn verify_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(ctx): Extension<InstitutionContext>,
    Path(request_id): Path<String>,
) -> Result<Json<DataRequest>, ApiError> {
    let caller = ctx.0;
    require_active(&caller)?;
    let platform_key = state.signing_key.verifying_key();

    let request = with_conn(state.pool.clone(), move |conn| {
        broker_protocol::record_verification(conn, &caller, &request_id, &platform_key, Utc::now())
            .map_err(ApiError::from)
    })
    .await?;

    tracing::info!(request_id = %request.id, "signature chain verified by provider");
    Ok(Json(request))
}

/// Handler for `POST /api/requests/{requestId}/delivery`.
pub async fn delivery_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(ctx): Extension<InstitutionContext>,
    Path(request_id): Path<String>,
    Json(body): Json<DeliveryBody>,
) -> Result<Json<DataRequest>, ApiError> {
    let caller = ctx.0;
    require_active(&caller)?;

    let request = with_conn(state.pool.clone(), move |conn| {
        broker_protocol::record_delivery(
            conn,
            &caller,
            &request_id,
            &body.signature,
            &body.data_hash,
            Utc::now(),
        )
        .map_err(ApiError::from)
    })
    .await?;

    tracing::info!(request_id = %request.id, "delivery recorded");
    Ok(Json(request))
}

/// Handler for `POST /api/requests/{requestId}/receipt`.
pub async fn receipt_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(ctx): Extension<InstitutionContext>,
    Path(request_id): Path<String>,
    Json(body): Json<ReceiptBody>,
) -> Result<Json<DataRequest>, ApiError> {
    let caller = ctx.0;
    require_active(&caller)?;
    let platform_key = state.signing_key.verifying_key();

    let request = with_conn(state.pool.clone(), move |conn| {
        broker_protocol::record_receipt(
            conn,
            &caller,
            &request_id,
            &body.signature,
            &platform_key,
            Utc::now(),
        )
        .map_err(ApiError::from)
    })
    .await?;

    tracing::info!(request_id = %request.id, "transaction completed");
    Ok(Json(request))
}

/// Handler for `POST /api/tokens/introspect`.
///
/// An invalid or expired token is reported as inactive; a token addressed
/// to a different provider is an authorization failure, not an inactive
/// token.
pub async fn introspect_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(ctx): Extension<InstitutionContext>,
    Json(body): Json<IntrospectBody>,
) -> Result<Json<Value>, ApiError> {
    require_active(&ctx.0)?;
    match broker_tokens::introspect_access_token(
        &body.token,
        &state.signing_key.verifying_key(),
        &ctx.0.id,
        Utc::now(),
    ) {
        Ok(claims) => Ok(Json(json!({
            "active": true,
            "iss": claims.iss,
            "aud": claims.aud,
            "sub": claims.sub,
            "exp": claims.exp,
            "jti": claims.jti,
            "requesterId": claims.extra_str("requesterId"),
            "schemaId": claims.extra_str("schemaId"),
        }))),
        Err(TokenError::WrongAudience) => Err(ApiError::Forbidden),
        Err(e) => {
            tracing::debug!(institution = %ctx.0.id, "introspected token inactive: {}", e);
            Ok(Json(json!({ "active": false })))
        }
    }
}
