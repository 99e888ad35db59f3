//! Trustbroker server library logic.

pub mod api_admin;
pub mod api_consent;
pub mod api_requests;
pub mod background;
pub mod config;
pub mod error;
pub mod middleware;
pub mod notify;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, patch, post},
    Extension, Json, Router,
};
use broker_db::DbPool;
use chrono::Duration;
use ed25519_dalek::SigningKey;
use notify::Notifier;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: DbPool,
    /// The broker signing key (Ed25519); signs platform chain signatures
    /// and access tokens.
    pub signing_key: Arc<SigningKey>,
    /// Issuer/audience string for tokens minted by and addressed to this
    /// broker.
    pub issuer: String,
    /// The public URL of the broker.
    pub public_url: String,
    /// Lifetime of minted access tokens.
    pub access_token_ttl: Duration,
    /// Shared admin token; admin routes reject everything when `None`.
    pub admin_token: Option<String>,
    /// Consent notification gateway, when configured.
    pub notifier: Option<Notifier>,
}

/// Maximum request body size (2 MiB). Protects against OOM from oversized payloads.
pub(crate) const MAX_REQUEST_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    // Institution-facing routes, authenticated by signed M2M calls.
    let m2m_routes = Router::new()
        .route("/api/requests", post(api_requests::create_request_handler))
        .route(
            "/api/requests/{requestId}",
            get(api_requests::get_request_handler),
        )
        .route(
            "/api/requests/{requestId}/verify",
            post(api_requests::verify_handler),
        )
        .route(
            "/api/requests/{requestId}/delivery",
            post(api_requests::delivery_handler),
        )
        .route(
            "/api/requests/{requestId}/receipt",
            post(api_requests::receipt_handler),
        )
        .route(
            "/api/tokens/introspect",
            post(api_requests::introspect_handler),
        )
        .layer(axum::middleware::from_fn(middleware::m2m_auth_middleware));

    // Device-facing routes: the consent token or denial assertion inside
    // the body is the credential, so no transport-level auth applies.
    let device_routes = Router::new()
        .route(
            "/api/requests/{requestId}/consent",
            post(api_consent::consent_handler),
        )
        .route(
            "/api/requests/{requestId}/deny",
            post(api_consent::deny_handler),
        );

    let admin_routes = Router::new()
        .route("/api/admin/roles", post(api_admin::create_role_handler))
        .route(
            "/api/admin/institutions",
            post(api_admin::create_institution_handler),
        )
        .route(
            "/api/admin/institutions/{institutionId}/status",
            patch(api_admin::set_institution_status_handler),
        )
        .route(
            "/api/admin/institutions/{institutionId}/rotate-key",
            post(api_admin::rotate_institution_key_handler),
        )
        .route("/api/admin/schemas", post(api_admin::create_schema_handler))
        .route(
            "/api/admin/schemas/{schemaId}",
            patch(api_admin::update_schema_handler),
        )
        .route(
            "/api/admin/relationships",
            post(api_admin::create_relationship_handler)
                .get(api_admin::list_relationships_handler),
        )
        .route(
            "/api/admin/relationships/{relationshipId}/status",
            patch(api_admin::set_relationship_status_handler),
        )
        .route(
            "/api/admin/relationships/{relationshipId}",
            delete(api_admin::delete_relationship_handler),
        )
        .route("/api/admin/users", post(api_admin::register_user_handler))
        .layer(axum::middleware::from_fn(middleware::admin_auth_middleware));

    Router::new()
        .route("/health", get(health))
        .merge(m2m_routes)
        .merge(device_routes)
        .merge(admin_routes)
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(Arc::new(state)))
}
