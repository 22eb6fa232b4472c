//! Outbox model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle state of an outbox row.
///
/// `Success` and `Failed` are terminal; only the administrative requeue
/// operation moves a row out of `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboxStatus {
    Pending,
    Success,
    Failed,
}

impl Default for OutboxStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "success" => Self::Success,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

/// Delivery channel of a notification entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationChannel {
    Email,
    Sms,
}

impl NotificationChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Sms => "sms",
        }
    }

    /// Parse a stored channel value. Returns `None` for unsupported values
    /// so callers can surface an unknown-channel error instead of guessing.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "email" => Some(Self::Email),
            "sms" => Some(Self::Sms),
            _ => None,
        }
    }
}

/// A queued guest notification.
///
/// `guest_contact` holds the ciphertext produced by the PII layer; the
/// plaintext address only ever exists transiently at the channel provider
/// boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationOutboxEntry {
    pub id: String,
    pub event: String,
    /// Raw channel value as stored; validated by the worker at claim time.
    pub channel: String,
    /// Raw JSON payload; validated by the worker at claim time.
    pub payload: String,
    pub guest_contact: String,
    pub language: String,
    pub status: OutboxStatus,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for enqueuing a notification (producer side).
#[derive(Debug, Clone)]
pub struct NewNotificationOutboxEntry {
    pub event: String,
    pub channel: NotificationChannel,
    pub payload: Value,
    /// Already-encrypted contact address or number.
    pub guest_contact: String,
    pub language: String,
    /// Defaults to now when `None`.
    pub scheduled_at: Option<DateTime<Utc>>,
}

/// A registered webhook endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEndpoint {
    pub id: String,
    pub url: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Input for registering a webhook endpoint.
#[derive(Debug, Clone)]
pub struct NewWebhookEndpoint {
    pub url: String,
    pub description: Option<String>,
    pub is_active: bool,
}

/// A queued webhook delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookDelivery {
    pub id: String,
    pub endpoint_id: String,
    pub event: String,
    /// Raw JSON payload; validated by the worker at claim time.
    pub payload: String,
    pub status: OutboxStatus,
    pub attempts: i64,
    pub last_error: Option<String>,
    /// The exact string that was signed on the most recent attempt,
    /// retained for audit and debugging.
    pub signature_input: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for enqueuing a webhook delivery (producer side).
#[derive(Debug, Clone)]
pub struct NewWebhookDelivery {
    pub endpoint_id: String,
    pub event: String,
    pub payload: Value,
    /// Defaults to now when `None`.
    pub scheduled_at: Option<DateTime<Utc>>,
}

/// Row counts per status for one outbox table.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct QueueDepth {
    pub pending: i64,
    pub success: i64,
    pub failed: i64,
}
