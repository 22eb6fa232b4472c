//! Mail and SMS transport seams with HTTP gateway implementations.

use async_trait::async_trait;
use outbox_core::{DeliveryError, DeliveryResult};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// Default timeout for gateway requests; bounds how long a hung transport
/// can stall the polling loop.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// An outbound email.
#[derive(Debug, Clone, Serialize)]
pub struct EmailMessage {
    pub to: String,
    pub from: String,
    pub subject: String,
    pub text: String,
}

/// An outbound SMS.
#[derive(Debug, Clone, Serialize)]
pub struct SmsMessage {
    pub to: String,
    pub from: String,
    pub text: String,
}

/// Seam over the external mail gateway.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> DeliveryResult<()>;
}

/// Seam over the external SMS gateway.
#[async_trait]
pub trait SmsTransport: Send + Sync {
    async fn send(&self, message: &SmsMessage) -> DeliveryResult<()>;
}

/// HTTP mail gateway client.
pub struct HttpMailGateway {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpMailGateway {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl MailTransport for HttpMailGateway {
    async fn send(&self, message: &EmailMessage) -> DeliveryResult<()> {
        let url = format!("{}/messages", self.base_url);

        debug!(url = %url, subject = %message.subject, "sending email");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(message)
            .send()
            .await
            .map_err(|e| DeliveryError::transient(format!("mail gateway: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::transient(format!(
                "mail gateway HTTP {status}: {body}"
            )));
        }

        Ok(())
    }
}

/// HTTP SMS gateway client.
pub struct HttpSmsGateway {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpSmsGateway {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl SmsTransport for HttpSmsGateway {
    async fn send(&self, message: &SmsMessage) -> DeliveryResult<()> {
        let url = format!("{}/messages", self.base_url);

        debug!(url = %url, "sending SMS");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(message)
            .send()
            .await
            .map_err(|e| DeliveryError::transient(format!("sms gateway: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::transient(format!(
                "sms gateway HTTP {status}: {body}"
            )));
        }

        Ok(())
    }
}
