//! Signed HTTP delivery client.

use outbox_core::{DeliveryError, DeliveryResult};
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// Bounds how long a hung endpoint can stall the polling loop.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const USER_AGENT: &str = concat!("reserve-webhooks/", env!("CARGO_PKG_VERSION"));

/// A fully-prepared delivery: the body is the exact string that was signed.
#[derive(Debug, Clone)]
pub struct SignedRequest {
    pub url: String,
    pub event: String,
    pub delivery_id: String,
    pub timestamp: i64,
    pub body: String,
    pub signature_header: String,
}

/// HTTP client for webhook POSTs.
pub struct WebhookClient {
    client: Client,
}

impl Default for WebhookClient {
    fn default() -> Self {
        Self::new()
    }
}

impl WebhookClient {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .expect("Failed to create HTTP client");

        Self { client }
    }

    /// POST the signed envelope. Any non-2xx response or network error is a
    /// transient failure that feeds the retry policy.
    pub async fn deliver(&self, request: &SignedRequest) -> DeliveryResult<()> {
        debug!(
            url = %request.url,
            event = %request.event,
            delivery_id = %request.delivery_id,
            "posting webhook"
        );

        let response = self
            .client
            .post(&request.url)
            .header("Content-Type", "application/json")
            .header("X-Reserve-Event", &request.event)
            .header("X-Reserve-Delivery", &request.delivery_id)
            .header("X-Reserve-Timestamp", request.timestamp.to_string())
            .header("X-Reserve-Signature", &request.signature_header)
            .body(request.body.clone())
            .send()
            .await
            .map_err(|e| DeliveryError::transient(format!("webhook request: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::transient(format!(
                "webhook HTTP {status}: {body}"
            )));
        }

        Ok(())
    }
}
