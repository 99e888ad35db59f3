//! Admin handlers: reference-data management behind the shared admin token.

use axum::{
    extract::{Extension, Json, Path, Query},
    http::StatusCode,
};
use broker_types::{
    DataSchema, Institution, InstitutionStatus, Relationship, RelationshipStatus, Role, User,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use crate::error::{with_conn, ApiError};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateRoleBody {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateInstitutionBody {
    pub name: String,
    #[serde(rename = "roleId")]
    pub role_id: String,
    #[serde(rename = "publicKey")]
    pub public_key: String,
    #[serde(rename = "clientId")]
    pub client_id: String,
    #[serde(rename = "apiEndpoint")]
    pub api_endpoint: String,
}

#[derive(Debug, Deserialize)]
pub struct InstitutionStatusBody {
    pub status: InstitutionStatus,
}

#[derive(Debug, Deserialize)]
pub struct RotateKeyBody {
    #[serde(rename = "publicKey")]
    pub public_key: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateSchemaBody {
    #[serde(rename = "schemaUrn")]
    pub schema_urn: String,
    #[serde(default)]
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSchemaBody {
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateRelationshipBody {
    #[serde(rename = "requesterRoleId")]
    pub requester_role_id: String,
    #[serde(rename = "providerRoleId")]
    pub provider_role_id: String,
    #[serde(rename = "schemaId")]
    pub schema_id: String,
}

#[derive(Debug, Deserialize)]
pub struct RelationshipStatusBody {
    pub status: RelationshipStatus,
}

#[derive(Debug, Deserialize)]
pub struct DeleteRelationshipQuery {
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Deserialize)]
pub struct RegisterUserBody {
    #[serde(rename = "externalId")]
    pub external_id: String,
    #[serde(rename = "federatedSubject")]
    pub federated_subject: Option<String>,
    #[serde(rename = "devicePublicKey")]
    pub device_public_key: String,
    #[serde(rename = "pushToken")]
    pub push_token: Option<String>,
}

/// Handler for `POST /api/admin/roles`.
pub async fn create_role_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(body): Json<CreateRoleBody>,
) -> Result<(StatusCode, Json<Role>), ApiError> {
    let role = with_conn(state.pool.clone(), move |conn| {
        broker_protocol::create_role(conn, &body.name).map_err(ApiError::from)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(role)))
}

/// Handler for `POST /api/admin/institutions`.
///
/// New institutions start PENDING; a separate status change activates them.
pub async fn create_institution_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(body): Json<CreateInstitutionBody>,
) -> Result<(StatusCode, Json<Institution>), ApiError> {
    let institution = with_conn(state.pool.clone(), move |conn| {
        broker_protocol::create_institution(
            conn,
            &broker_protocol::NewInstitution {
                name: body.name,
                role_id: body.role_id,
                public_key: body.public_key,
                client_id: body.client_id,
                api_endpoint: body.api_endpoint,
            },
            Utc::now(),
        )
        .map_err(ApiError::from)
    })
    .await?;
    tracing::info!(institution_id = %institution.id, "institution registered");
    Ok((StatusCode::CREATED, Json(institution)))
}

/// Handler for `PATCH /api/admin/institutions/{institutionId}/status`.
pub async fn set_institution_status_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(institution_id): Path<String>,
    Json(body): Json<InstitutionStatusBody>,
) -> Result<StatusCode, ApiError> {
    with_conn(state.pool.clone(), move |conn| {
        broker_protocol::set_institution_status(conn, &institution_id, body.status)
            .map_err(ApiError::from)
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Handler for `POST /api/admin/institutions/{institutionId}/rotate-key`.
pub async fn rotate_institution_key_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(institution_id): Path<String>,
    Json(body): Json<RotateKeyBody>,
) -> Result<StatusCode, ApiError> {
    let institution_id_for_conn = institution_id.clone();
    with_conn(state.pool.clone(), move |conn| {
        broker_protocol::rotate_institution_key(conn, &institution_id_for_conn, &body.public_key)
            .map_err(ApiError::from)
    })
    .await?;
    tracing::info!(institution_id = %institution_id, "institution key rotated");
    Ok(StatusCode::NO_CONTENT)
}

/// Handler for `POST /api/admin/schemas`.
pub async fn create_schema_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(body): Json<CreateSchemaBody>,
) -> Result<(StatusCode, Json<DataSchema>), ApiError> {
    let schema = with_conn(state.pool.clone(), move |conn| {
        broker_protocol::create_schema(conn, &body.schema_urn, &body.description, &body.parameters)
            .map_err(ApiError::from)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(schema)))
}

/// Handler for `PATCH /api/admin/schemas/{schemaId}`.
///
/// Only the description is mutable; the URN and parameter map are fixed
/// once the schema exists.
pub async fn update_schema_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(schema_id): Path<String>,
    Json(body): Json<UpdateSchemaBody>,
) -> Result<StatusCode, ApiError> {
    with_conn(state.pool.clone(), move |conn| {
        broker_protocol::update_schema_description(conn, &schema_id, &body.description)
            .map_err(ApiError::from)
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Handler for `POST /api/admin/relationships`.
pub async fn create_relationship_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(body): Json<CreateRelationshipBody>,
) -> Result<(StatusCode, Json<Relationship>), ApiError> {
    let relationship = with_conn(state.pool.clone(), move |conn| {
        broker_protocol::create_relationship(
            conn,
            &body.requester_role_id,
            &body.provider_role_id,
            &body.schema_id,
            Utc::now(),
        )
        .map_err(ApiError::from)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(relationship)))
}

/// Handler for `GET /api/admin/relationships`.
pub async fn list_relationships_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<Vec<Relationship>>, ApiError> {
    let relationships = with_conn(state.pool.clone(), move |conn| {
        broker_protocol::list_relationships(conn).map_err(ApiError::from)
    })
    .await?;
    Ok(Json(relationships))
}

/// Handler for `PATCH /api/admin/relationships/{relationshipId}/status`.
pub async fn set_relationship_status_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(relationship_id): Path<String>,
    Json(body): Json<RelationshipStatusBody>,
) -> Result<StatusCode, ApiError> {
    with_conn(state.pool.clone(), move |conn| {
        broker_protocol::set_relationship_status(conn, &relationship_id, body.status)
            .map_err(ApiError::from)
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Handler for `DELETE /api/admin/relationships/{relationshipId}`.
///
/// Refused with 409 while data requests reference the relationship, unless
/// `?force=true` explicitly accepts orphaning those audit records.
pub async fn delete_relationship_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(relationship_id): Path<String>,
    Query(query): Query<DeleteRelationshipQuery>,
) -> Result<StatusCode, ApiError> {
    with_conn(state.pool.clone(), move |conn| {
        broker_protocol::delete_relationship(conn, &relationship_id, query.force).map_err(|e| {
            match e {
                broker_protocol::ProtocolError::RelationshipInUse => {
                    // Surfaced verbatim rather than as an opaque 403: the
                    // admin needs to know force is required.
                    ApiError::Conflict(e.to_string())
                }
                other => ApiError::from(other),
            }
        })
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Handler for `POST /api/admin/users`.
///
/// Get-or-create from a federated identity exchange; re-registration
/// replaces the device key and push handle.
pub async fn register_user_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(body): Json<RegisterUserBody>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    let user = with_conn(state.pool.clone(), move |conn| {
        broker_protocol::resolve_federated_user(
            conn,
            &broker_protocol::NewUser {
                external_id: body.external_id,
                federated_subject: body.federated_subject,
                device_public_key: body.device_public_key,
                push_token: body.push_token,
            },
            Utc::now(),
        )
        .map_err(ApiError::from)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(user)))
}
