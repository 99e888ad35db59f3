//! Trustbroker server binary — the main entry point for the broker.
//!
//! Starts an axum HTTP server with structured logging, database
//! initialization, a background expiry sweep, and graceful shutdown on
//! SIGTERM/SIGINT.

use broker_server::{app, background, config, notify::Notifier, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("BROKER_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    // Load configuration
    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration — the server cannot start without valid config");

    // Initialize tracing
    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    // Initialize database
    let pool = broker_db::create_pool(
        &config.database.path,
        broker_db::PoolSettings {
            max_connections: config.database.pool_max_size,
            busy_timeout_ms: config.database.busy_timeout_ms,
        },
    )
    .expect("failed to create database pool — check database.path in config");

    {
        let conn = pool
            .get()
            .expect("failed to get database connection for migrations");
        let applied = broker_db::run_migrations(&conn).expect("failed to run database migrations");
        if applied > 0 {
            tracing::info!(count = applied, "applied database migrations");
        }
    }

    // Signing key: from config, or ephemeral. An ephemeral key invalidates
    // every outstanding access token and platform signature on restart.
    let signing_key = match &config.broker.signing_key_hex {
        Some(hex_key) => broker_crypto::decode_signing_key_hex(hex_key)
            .expect("broker.signing_key_hex is not a valid Ed25519 signing key"),
        None => {
            tracing::warn!(
                "no signing key configured, generating an ephemeral key; \
                 minted tokens will not survive a restart"
            );
            broker_crypto::generate_signing_key()
        }
    };

    if config.broker.admin_token.is_none() {
        tracing::warn!("no admin token configured, admin API is disabled");
    }

    let state = AppState {
        pool,
        signing_key: Arc::new(signing_key),
        issuer: config.broker.issuer.clone(),
        public_url: config.broker.public_url.clone(),
        access_token_ttl: chrono::Duration::minutes(config.broker.access_token_ttl_minutes),
        admin_token: config.broker.admin_token.clone(),
        notifier: config.broker.notify_url.clone().map(Notifier::new),
    };

    // Background expiry sweep
    let sweep_state = Arc::new(state.clone());
    tokio::spawn(background::start_expiry_sweep(
        sweep_state,
        config.broker.sweep_interval_seconds,
    ));

    // Build application
    let app = app(state);
    let addr = SocketAddr::new(config.server.host, config.server.port);

    tracing::info!(%addr, issuer = %config.broker.issuer, "starting trustbroker server");

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address — is another process using this port?");

    // Serve with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    tracing::info!("trustbroker server shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
