//! Async SQLite executor using a dedicated background thread.
//!
//! All SQLite operations run on a single dedicated thread; callers await
//! results through a channel. One writer thread is optimal for SQLite
//! (writes are serialized anyway) and keeps the Tokio runtime free for the
//! delivery loops' network I/O.
//!
//! Only SQL and lightweight row mapping belong inside `call()` closures —
//! no network calls, no crypto, no heavy computation.

use crate::{migrations, queries, StoreError, StoreResult};
use crate::{
    NewNotificationOutboxEntry, NewWebhookDelivery, NewWebhookEndpoint, NotificationOutboxEntry,
    QueueDepth, WebhookDelivery, WebhookEndpoint,
};
use chrono::{DateTime, Utc};
use std::path::Path;
use tokio_rusqlite::Connection;
use tracing::info;

/// Convert a tokio_rusqlite::Error to StoreError.
fn from_tokio_rusqlite(e: tokio_rusqlite::Error) -> StoreError {
    match e {
        tokio_rusqlite::Error::Rusqlite(e) => StoreError::Sqlite(e),
        tokio_rusqlite::Error::Close(_) => StoreError::Connection("Connection closed".to_string()),
        other => StoreError::Connection(other.to_string()),
    }
}

/// Handle to the outbox database.
///
/// Cheap to clone; all clones share the same executor thread.
#[derive(Clone)]
pub struct OutboxDb {
    conn: Connection,
    path: String,
}

impl OutboxDb {
    /// Open the outbox database at the given path, running migrations.
    pub async fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let path_str = path.to_string_lossy().to_string();

        let conn = Connection::open(&path_str)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let db = Self {
            conn,
            path: path_str.clone(),
        };
        db.init().await?;

        info!(path = %path_str, "Outbox database initialized with WAL mode");
        Ok(db)
    }

    /// Open an in-memory database for testing.
    pub async fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let db = Self {
            conn,
            path: ":memory:".to_string(),
        };
        db.init().await?;
        Ok(db)
    }

    async fn init(&self) -> StoreResult<()> {
        self.call(|conn| {
            // WAL is a no-op on in-memory databases
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA foreign_keys = ON;
                PRAGMA busy_timeout = 5000;
                ",
            )?;
            migrations::run_migrations(conn)
        })
        .await
    }

    /// Execute a closure on the database connection.
    ///
    /// The closure runs on the dedicated SQLite thread; the caller's task is
    /// parked (not blocked) until the result is ready.
    pub async fn call<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut rusqlite::Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let outer_result = self.conn.call(move |conn| Ok(f(conn))).await;

        match outer_result {
            Ok(inner) => inner,
            Err(e) => Err(from_tokio_rusqlite(e)),
        }
    }

    /// Get the database file path.
    pub fn path(&self) -> &str {
        &self.path
    }

    // ==========================================
    // Notification outbox
    // ==========================================

    pub async fn insert_notification(
        &self,
        entry: NewNotificationOutboxEntry,
    ) -> StoreResult<NotificationOutboxEntry> {
        self.call(move |conn| queries::insert_notification(conn, &entry))
            .await
    }

    pub async fn get_notification(
        &self,
        id: &str,
    ) -> StoreResult<Option<NotificationOutboxEntry>> {
        let id = id.to_string();
        self.call(move |conn| queries::get_notification(conn, &id))
            .await
    }

    pub async fn claim_notification_batch(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<NotificationOutboxEntry>> {
        let worker_id = worker_id.to_string();
        self.call(move |conn| queries::claim_notification_batch(conn, &worker_id, now, limit))
            .await
    }

    pub async fn mark_notification_success(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let id = id.to_string();
        self.call(move |conn| queries::mark_notification_success(conn, &id, now))
            .await
    }

    pub async fn mark_notification_retry(
        &self,
        id: &str,
        attempts: i64,
        error: &str,
        next_scheduled_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let id = id.to_string();
        let error = error.to_string();
        self.call(move |conn| {
            queries::mark_notification_retry(conn, &id, attempts, &error, next_scheduled_at, now)
        })
        .await
    }

    pub async fn mark_notification_dead_letter(
        &self,
        id: &str,
        attempts: i64,
        error: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let id = id.to_string();
        let error = error.to_string();
        self.call(move |conn| {
            queries::mark_notification_dead_letter(conn, &id, attempts, &error, now)
        })
        .await
    }

    pub async fn release_notification_claim(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let id = id.to_string();
        self.call(move |conn| queries::release_notification_claim(conn, &id, now))
            .await
    }

    pub async fn requeue_notification(&self, id: &str, now: DateTime<Utc>) -> StoreResult<bool> {
        let id = id.to_string();
        self.call(move |conn| queries::requeue_notification(conn, &id, now))
            .await
    }

    pub async fn notification_queue_depth(&self) -> StoreResult<QueueDepth> {
        self.call(|conn| queries::notification_queue_depth(conn))
            .await
    }

    // ==========================================
    // Webhook endpoints and deliveries
    // ==========================================

    pub async fn insert_webhook_endpoint(
        &self,
        endpoint: NewWebhookEndpoint,
    ) -> StoreResult<WebhookEndpoint> {
        self.call(move |conn| queries::insert_webhook_endpoint(conn, &endpoint))
            .await
    }

    pub async fn get_webhook_endpoint(&self, id: &str) -> StoreResult<Option<WebhookEndpoint>> {
        let id = id.to_string();
        self.call(move |conn| queries::get_webhook_endpoint(conn, &id))
            .await
    }

    pub async fn insert_webhook_delivery(
        &self,
        delivery: NewWebhookDelivery,
    ) -> StoreResult<WebhookDelivery> {
        self.call(move |conn| queries::insert_webhook_delivery(conn, &delivery))
            .await
    }

    pub async fn get_webhook_delivery(&self, id: &str) -> StoreResult<Option<WebhookDelivery>> {
        let id = id.to_string();
        self.call(move |conn| queries::get_webhook_delivery(conn, &id))
            .await
    }

    pub async fn claim_webhook_batch(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<WebhookDelivery>> {
        let worker_id = worker_id.to_string();
        self.call(move |conn| queries::claim_webhook_batch(conn, &worker_id, now, limit))
            .await
    }

    pub async fn mark_webhook_success(&self, id: &str, now: DateTime<Utc>) -> StoreResult<bool> {
        let id = id.to_string();
        self.call(move |conn| queries::mark_webhook_success(conn, &id, now))
            .await
    }

    pub async fn mark_webhook_retry(
        &self,
        id: &str,
        attempts: i64,
        error: &str,
        next_scheduled_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let id = id.to_string();
        let error = error.to_string();
        self.call(move |conn| {
            queries::mark_webhook_retry(conn, &id, attempts, &error, next_scheduled_at, now)
        })
        .await
    }

    pub async fn mark_webhook_dead_letter(
        &self,
        id: &str,
        attempts: i64,
        error: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let id = id.to_string();
        let error = error.to_string();
        self.call(move |conn| queries::mark_webhook_dead_letter(conn, &id, attempts, &error, now))
            .await
    }

    pub async fn release_webhook_claim(&self, id: &str, now: DateTime<Utc>) -> StoreResult<()> {
        let id = id.to_string();
        self.call(move |conn| queries::release_webhook_claim(conn, &id, now))
            .await
    }

    pub async fn record_webhook_signature_input(
        &self,
        id: &str,
        signature_input: &str,
    ) -> StoreResult<()> {
        let id = id.to_string();
        let signature_input = signature_input.to_string();
        self.call(move |conn| queries::record_webhook_signature_input(conn, &id, &signature_input))
            .await
    }

    pub async fn requeue_webhook(&self, id: &str, now: DateTime<Utc>) -> StoreResult<bool> {
        let id = id.to_string();
        self.call(move |conn| queries::requeue_webhook(conn, &id, now))
            .await
    }

    pub async fn webhook_queue_depth(&self) -> StoreResult<QueueDepth> {
        self.call(|conn| queries::webhook_queue_depth(conn)).await
    }

    /// Release claims older than the cutoff on both outbox tables
    /// (crash recovery on worker startup).
    pub async fn release_stale_claims(&self, older_than: DateTime<Utc>) -> StoreResult<usize> {
        self.call(move |conn| {
            let notifications = queries::release_stale_notification_claims(conn, older_than)?;
            let webhooks = queries::release_stale_webhook_claims(conn, older_than)?;
            Ok(notifications + webhooks)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NotificationChannel;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn open_creates_schema_on_disk() {
        let dir = tempdir().unwrap();
        let db = OutboxDb::open(&dir.path().join("outbox.db")).await.unwrap();

        let depth = db.notification_queue_depth().await.unwrap();
        assert_eq!(depth.pending, 0);
    }

    #[tokio::test]
    async fn clones_share_the_same_database() {
        let db = OutboxDb::open_in_memory().await.unwrap();
        let other = db.clone();

        db.insert_notification(NewNotificationOutboxEntry {
            event: "reservation.created".to_string(),
            channel: NotificationChannel::Sms,
            payload: json!({"variables": {}}),
            guest_contact: "enc:v1:00ff".to_string(),
            language: "de".to_string(),
            scheduled_at: None,
        })
        .await
        .unwrap();

        let depth = other.notification_queue_depth().await.unwrap();
        assert_eq!(depth.pending, 1);
    }

    #[tokio::test]
    async fn claim_through_executor_marks_rows() {
        let db = OutboxDb::open_in_memory().await.unwrap();
        let now = Utc::now();

        db.insert_notification(NewNotificationOutboxEntry {
            event: "reservation.created".to_string(),
            channel: NotificationChannel::Email,
            payload: json!({"variables": {}}),
            guest_contact: "enc:v1:00ff".to_string(),
            language: "en".to_string(),
            scheduled_at: None,
        })
        .await
        .unwrap();

        let batch = db.claim_notification_batch("worker-a", now, 10).await.unwrap();
        assert_eq!(batch.len(), 1);

        let again = db.claim_notification_batch("worker-a", now, 10).await.unwrap();
        assert!(again.is_empty());
    }
}
