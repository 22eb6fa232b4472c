//! Notification worker processor.

use crate::{decrypt_contact, ContactCipher, EmailMessage, MailTransport, SmsMessage, SmsTransport};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dispatch_loop::OutboxProcessor;
use notify_templates::{TemplateError, TemplateStore};
use outbox_core::{DeliveryError, NotificationPayload};
use outbox_store::{NotificationChannel, NotificationOutboxEntry, OutboxDb};
use std::sync::Arc;

/// From-identity the platform sends notifications as.
#[derive(Debug, Clone)]
pub struct SenderIdentity {
    pub from_email: String,
    /// Absent when the deployment has no SMS sender registered.
    pub from_number: Option<String>,
}

/// Binds the notification outbox, the template renderer, the PII cipher and
/// the transports into a processor the dispatcher can drive.
pub struct NotificationProcessor {
    db: OutboxDb,
    templates: Arc<TemplateStore>,
    /// `None` when the PII key is unconfigured; the whole cycle then fails
    /// closed because no contact can be decrypted.
    cipher: Option<Arc<dyn ContactCipher>>,
    mail: Arc<dyn MailTransport>,
    /// `None` when the SMS gateway is unconfigured; an SMS row then fails
    /// the cycle closed instead of being silently marked sent.
    sms: Option<Arc<dyn SmsTransport>>,
    sender: SenderIdentity,
    worker_id: String,
}

impl NotificationProcessor {
    pub fn new(
        db: OutboxDb,
        templates: Arc<TemplateStore>,
        cipher: Option<Arc<dyn ContactCipher>>,
        mail: Arc<dyn MailTransport>,
        sms: Option<Arc<dyn SmsTransport>>,
        sender: SenderIdentity,
    ) -> Self {
        Self {
            db,
            templates,
            cipher,
            mail,
            sms,
            sender,
            worker_id: format!("notify-{}", uuid::Uuid::new_v4()),
        }
    }

    fn cipher(&self) -> Result<&dyn ContactCipher, DeliveryError> {
        self.cipher
            .as_deref()
            .ok_or_else(|| DeliveryError::configuration("PII key not configured"))
    }

    async fn send_email(
        &self,
        entry: &NotificationOutboxEntry,
        payload: &NotificationPayload,
    ) -> Result<(), DeliveryError> {
        let to = decrypt_contact(self.cipher()?, &entry.guest_contact)?;
        let subject = self
            .templates
            .subject(&entry.language, &entry.event, &payload.variables)
            .map_err(map_template_err)?;
        let text = self
            .templates
            .render(&entry.language, &entry.event, &payload.variables)
            .map_err(map_template_err)?;

        self.mail
            .send(&EmailMessage {
                to,
                from: self.sender.from_email.clone(),
                subject,
                text,
            })
            .await
    }

    async fn send_sms(
        &self,
        entry: &NotificationOutboxEntry,
        payload: &NotificationPayload,
    ) -> Result<(), DeliveryError> {
        let transport = self
            .sms
            .as_ref()
            .ok_or_else(|| DeliveryError::configuration("SMS gateway not configured"))?;
        let from = self
            .sender
            .from_number
            .clone()
            .ok_or_else(|| DeliveryError::configuration("SMS sender number not configured"))?;

        let to = decrypt_contact(self.cipher()?, &entry.guest_contact)?;
        let text = self
            .templates
            .render(&entry.language, &entry.event, &payload.variables)
            .map_err(map_template_err)?;

        transport.send(&SmsMessage { to, from, text }).await
    }
}

/// A missing template cannot be fixed by retrying; anything else might.
fn map_template_err(e: TemplateError) -> DeliveryError {
    match e {
        TemplateError::Missing { .. } => DeliveryError::permanent_payload(e.to_string()),
        TemplateError::Io(_) => DeliveryError::transient(e.to_string()),
    }
}

fn store_err(e: outbox_store::StoreError) -> DeliveryError {
    DeliveryError::Store(e.to_string())
}

#[async_trait]
impl OutboxProcessor for NotificationProcessor {
    type Item = NotificationOutboxEntry;

    fn kind(&self) -> &'static str {
        "notifications"
    }

    fn preflight(&self) -> Result<(), DeliveryError> {
        if self.cipher.is_none() {
            return Err(DeliveryError::configuration("PII key not configured"));
        }
        Ok(())
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<NotificationOutboxEntry>, DeliveryError> {
        self.db
            .claim_notification_batch(&self.worker_id, now, limit)
            .await
            .map_err(store_err)
    }

    fn item_id<'a>(&self, item: &'a NotificationOutboxEntry) -> &'a str {
        &item.id
    }

    fn item_attempts(&self, item: &NotificationOutboxEntry) -> i64 {
        item.attempts
    }

    async fn deliver(
        &self,
        entry: &NotificationOutboxEntry,
        _attempt: i64,
    ) -> Result<(), DeliveryError> {
        let channel = NotificationChannel::parse(&entry.channel)
            .ok_or_else(|| DeliveryError::UnknownChannel(entry.channel.clone()))?;
        let payload = NotificationPayload::parse(&entry.payload)?;

        match channel {
            NotificationChannel::Email => self.send_email(entry, &payload).await,
            NotificationChannel::Sms => self.send_sms(entry, &payload).await,
        }
    }

    async fn mark_success(
        &self,
        item: &NotificationOutboxEntry,
        now: DateTime<Utc>,
    ) -> Result<(), DeliveryError> {
        self.db
            .mark_notification_success(&item.id, now)
            .await
            .map(|_| ())
            .map_err(store_err)
    }

    async fn mark_retry(
        &self,
        item: &NotificationOutboxEntry,
        attempts: i64,
        error: &str,
        next_scheduled_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), DeliveryError> {
        self.db
            .mark_notification_retry(&item.id, attempts, error, next_scheduled_at, now)
            .await
            .map(|_| ())
            .map_err(store_err)
    }

    async fn mark_dead_letter(
        &self,
        item: &NotificationOutboxEntry,
        attempts: i64,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), DeliveryError> {
        self.db
            .mark_notification_dead_letter(&item.id, attempts, error, now)
            .await
            .map(|_| ())
            .map_err(store_err)
    }

    async fn release_claim(
        &self,
        item: &NotificationOutboxEntry,
        now: DateTime<Utc>,
    ) -> Result<(), DeliveryError> {
        self.db
            .release_notification_claim(&item.id, now)
            .await
            .map_err(store_err)
    }
}
