//! Typed outbox payloads.
//!
//! Payload columns are stored as opaque JSON by the producers. The workers
//! validate them into these structs at claim time, so a malformed row fails
//! fast as a permanent payload error instead of deep inside a channel
//! provider.

use crate::DeliveryError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Payload of a notification outbox entry: the variables handed to the
/// template renderer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPayload {
    /// Template interpolation variables, e.g. `{"guestName": "Ana"}`.
    pub variables: Map<String, Value>,
}

impl NotificationPayload {
    pub fn parse(raw: &str) -> Result<Self, DeliveryError> {
        serde_json::from_str(raw)
            .map_err(|e| DeliveryError::PermanentPayload(format!("notification payload: {e}")))
    }
}

/// Payload of a webhook delivery: the opaque `data` field of the envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub data: Value,
}

impl WebhookPayload {
    pub fn parse(raw: &str) -> Result<Self, DeliveryError> {
        serde_json::from_str(raw)
            .map_err(|e| DeliveryError::PermanentPayload(format!("webhook payload: {e}")))
    }
}
