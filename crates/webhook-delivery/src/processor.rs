//! Webhook worker processor.

use crate::{signing, SignedRequest, WebhookClient};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dispatch_loop::OutboxProcessor;
use outbox_core::{Clock, DeliveryError, WebhookPayload};
use outbox_store::{OutboxDb, WebhookDelivery};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Wire envelope POSTed to the endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WebhookEnvelope<'a> {
    id: &'a str,
    event: &'a str,
    attempt: i64,
    created_at: String,
    data: &'a Value,
}

/// Binds the webhook outbox, the signer and the HTTP client into a
/// processor the dispatcher can drive.
pub struct WebhookProcessor {
    db: OutboxDb,
    client: WebhookClient,
    /// Shared signing secret. `None` fails the whole cycle closed: no
    /// unsigned payload ever leaves the platform.
    secret: Option<String>,
    clock: Arc<dyn Clock>,
    worker_id: String,
}

impl WebhookProcessor {
    pub fn new(
        db: OutboxDb,
        client: WebhookClient,
        secret: Option<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            db,
            client,
            secret,
            clock,
            worker_id: format!("webhook-{}", uuid::Uuid::new_v4()),
        }
    }
}

fn store_err(e: outbox_store::StoreError) -> DeliveryError {
    DeliveryError::Store(e.to_string())
}

#[async_trait]
impl OutboxProcessor for WebhookProcessor {
    type Item = WebhookDelivery;

    fn kind(&self) -> &'static str {
        "webhooks"
    }

    fn preflight(&self) -> Result<(), DeliveryError> {
        if self.secret.is_none() {
            return Err(DeliveryError::configuration(
                "webhook signing secret not configured",
            ));
        }
        Ok(())
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<WebhookDelivery>, DeliveryError> {
        self.db
            .claim_webhook_batch(&self.worker_id, now, limit)
            .await
            .map_err(store_err)
    }

    fn item_id<'a>(&self, item: &'a WebhookDelivery) -> &'a str {
        &item.id
    }

    fn item_attempts(&self, item: &WebhookDelivery) -> i64 {
        item.attempts
    }

    async fn deliver(&self, delivery: &WebhookDelivery, attempt: i64) -> Result<(), DeliveryError> {
        let secret = self
            .secret
            .as_deref()
            .ok_or_else(|| DeliveryError::configuration("webhook signing secret not configured"))?;

        let payload = WebhookPayload::parse(&delivery.payload)?;

        let endpoint = self
            .db
            .get_webhook_endpoint(&delivery.endpoint_id)
            .await
            .map_err(store_err)?
            .ok_or_else(|| {
                DeliveryError::permanent_payload(format!(
                    "endpoint {} not registered",
                    delivery.endpoint_id
                ))
            })?;

        if !endpoint.is_active {
            return Err(DeliveryError::permanent_payload(format!(
                "endpoint {} is inactive",
                endpoint.id
            )));
        }

        let envelope = WebhookEnvelope {
            id: &delivery.id,
            event: &delivery.event,
            attempt,
            created_at: delivery.created_at.to_rfc3339(),
            data: &payload.data,
        };
        let body = serde_json::to_string(&envelope)
            .map_err(|e| DeliveryError::permanent_payload(format!("envelope: {e}")))?;

        let timestamp = self.clock.now().timestamp();
        let input = signing::signature_input(timestamp, &body);

        // Audit trail: keep the exact signed string on the row, even when
        // the attempt itself fails.
        self.db
            .record_webhook_signature_input(&delivery.id, &input)
            .await
            .map_err(store_err)?;

        let signature = signing::sign(secret, &input);

        self.client
            .deliver(&SignedRequest {
                url: endpoint.url,
                event: delivery.event.clone(),
                delivery_id: delivery.id.clone(),
                timestamp,
                body,
                signature_header: signing::signature_header(timestamp, &signature),
            })
            .await
    }

    async fn mark_success(
        &self,
        item: &WebhookDelivery,
        now: DateTime<Utc>,
    ) -> Result<(), DeliveryError> {
        self.db
            .mark_webhook_success(&item.id, now)
            .await
            .map(|_| ())
            .map_err(store_err)
    }

    async fn mark_retry(
        &self,
        item: &WebhookDelivery,
        attempts: i64,
        error: &str,
        next_scheduled_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), DeliveryError> {
        self.db
            .mark_webhook_retry(&item.id, attempts, error, next_scheduled_at, now)
            .await
            .map(|_| ())
            .map_err(store_err)
    }

    async fn mark_dead_letter(
        &self,
        item: &WebhookDelivery,
        attempts: i64,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), DeliveryError> {
        self.db
            .mark_webhook_dead_letter(&item.id, attempts, error, now)
            .await
            .map(|_| ())
            .map_err(store_err)
    }

    async fn release_claim(
        &self,
        item: &WebhookDelivery,
        now: DateTime<Utc>,
    ) -> Result<(), DeliveryError> {
        self.db
            .release_webhook_claim(&item.id, now)
            .await
            .map_err(store_err)
    }
}
