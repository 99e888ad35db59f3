//! Fire-and-forget consent notifications.
//!
//! When a data request enters AWAITING_CONSENT the broker tells the
//! notification gateway so the owner's device can prompt them. Delivery is
//! best effort: failures are logged and never fail the originating call.

use serde::Serialize;
use std::time::Duration;

/// Payload posted to the notification gateway.
#[derive(Debug, Clone, Serialize)]
pub struct ConsentPrompt {
    #[serde(rename = "deviceToken")]
    pub device_token: String,
    #[serde(rename = "requestId")]
    pub request_id: String,
    #[serde(rename = "requesterName")]
    pub requester_name: String,
    #[serde(rename = "providerName")]
    pub provider_name: String,
    #[serde(rename = "schemaName")]
    pub schema_name: String,
}

/// Handle to the notification gateway.
#[derive(Clone, Debug)]
pub struct Notifier {
    client: reqwest::Client,
    url: String,
}

impl Notifier {
    pub fn new(url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            // Builder only fails on TLS backend misconfiguration; fall back
            // to defaults rather than refusing to start.
            .unwrap_or_default();
        Self { client, url }
    }

    /// Dispatches a consent prompt without blocking the caller.
    pub fn dispatch(&self, prompt: ConsentPrompt) {
        let client = self.client.clone();
        let url = self.url.clone();
        tokio::spawn(async move {
            let request_id = prompt.request_id.clone();
            match client.post(&url).json(&prompt).send().await {
                Ok(resp) if resp.status().is_success() => {
                    tracing::debug!(request_id = %request_id, "consent prompt dispatched");
                }
                Ok(resp) => {
                    tracing::warn!(
                        request_id = %request_id,
                        status = %resp.status(),
                        "notification gateway rejected consent prompt"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        request_id = %request_id,
                        "failed to dispatch consent prompt: {}",
                        e
                    );
                }
            }
        });
    }
}
