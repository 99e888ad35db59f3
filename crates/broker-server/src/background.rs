//! Background tasks for the broker server.

use crate::AppState;
use chrono::Utc;
use std::sync::Arc;
use tokio::time::{sleep, Duration};

/// Starts the periodic expiry sweep.
///
/// Expiry is already applied lazily on every read; the sweep exists so
/// requests nobody polls still reach EXPIRED and stop counting as open.
/// Runs indefinitely.
pub async fn start_expiry_sweep(state: Arc<AppState>, interval_seconds: u64) {
    if interval_seconds == 0 {
        tracing::warn!("expiry sweep disabled (interval=0)");
        return;
    }

    let interval = Duration::from_secs(interval_seconds);
    tracing::info!(interval_seconds, "starting expiry sweep task");

    loop {
        sleep(interval).await;

        let pool = state.pool.clone();
        let res = tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(|e| e.to_string())?;
            broker_protocol::sweep_expired(&conn, Utc::now()).map_err(|e| e.to_string())
        })
        .await;

        match res {
            Ok(Ok(count)) => {
                if count > 0 {
                    tracing::info!(count, "expired overdue data requests");
                }
            }
            Ok(Err(e)) => {
                tracing::error!("expiry sweep failed: {}", e);
            }
            Err(e) => {
                tracing::error!("expiry sweep join error: {}", e);
            }
        }
    }
}
