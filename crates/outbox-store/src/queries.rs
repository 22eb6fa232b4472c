//! Standalone query functions that work with any Connection.
//!
//! Each function takes a `&Connection` (or `&mut Connection` where a
//! transaction is required) so they compose with the async executor and
//! with plain test connections alike.

use crate::{
    NewNotificationOutboxEntry, NewWebhookDelivery, NewWebhookEndpoint, NotificationOutboxEntry,
    OutboxStatus, QueueDepth, StoreError, StoreResult, WebhookDelivery, WebhookEndpoint,
};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection};

/// Format a timestamp for storage. Fixed-width UTC RFC 3339 so the TEXT
/// columns compare correctly in SQL.
pub fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

// ==========================================
// Notification outbox
// ==========================================

fn map_notification_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<NotificationOutboxEntry> {
    Ok(NotificationOutboxEntry {
        id: row.get(0)?,
        event: row.get(1)?,
        channel: row.get(2)?,
        payload: row.get(3)?,
        guest_contact: row.get(4)?,
        language: row.get(5)?,
        status: OutboxStatus::from_str(&row.get::<_, String>(6)?),
        attempts: row.get(7)?,
        last_error: row.get(8)?,
        scheduled_at: parse_datetime(row.get::<_, String>(9)?),
        claimed_by: row.get(10)?,
        claimed_at: row.get::<_, Option<String>>(11)?.map(parse_datetime),
        created_at: parse_datetime(row.get::<_, String>(12)?),
        updated_at: parse_datetime(row.get::<_, String>(13)?),
    })
}

const NOTIFICATION_COLUMNS: &str = "id, event, channel, payload, guest_contact, language, status, \
     attempts, last_error, scheduled_at, claimed_by, claimed_at, created_at, updated_at";

/// Enqueue a notification (producer side).
pub fn insert_notification(
    conn: &Connection,
    entry: &NewNotificationOutboxEntry,
) -> StoreResult<NotificationOutboxEntry> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = Utc::now();
    let scheduled_at = entry.scheduled_at.unwrap_or(now);

    conn.execute(
        "INSERT INTO notification_outbox (id, event, channel, payload, guest_contact, language, status, attempts, scheduled_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', 0, ?7, ?8, ?8)",
        params![
            id,
            entry.event,
            entry.channel.as_str(),
            serde_json::to_string(&entry.payload)?,
            entry.guest_contact,
            entry.language,
            fmt_ts(scheduled_at),
            fmt_ts(now),
        ],
    )?;

    get_notification(conn, &id)?
        .ok_or_else(|| StoreError::NotFound("notification not found after insert".to_string()))
}

/// Get a notification entry by ID.
pub fn get_notification(
    conn: &Connection,
    id: &str,
) -> StoreResult<Option<NotificationOutboxEntry>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {NOTIFICATION_COLUMNS} FROM notification_outbox WHERE id = ?1"
    ))?;

    let result = stmt.query_row(params![id], map_notification_row);

    match result {
        Ok(entry) => Ok(Some(entry)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Atomically claim a batch of due notification entries.
///
/// Selects pending unclaimed rows with `scheduled_at <= now` in
/// `(scheduled_at, created_at)` order, then stamps `claimed_by`/`claimed_at`
/// under the same transaction. A row that loses the conditional update (a
/// concurrent claimant got there first) is simply dropped from the batch.
pub fn claim_notification_batch(
    conn: &mut Connection,
    worker_id: &str,
    now: DateTime<Utc>,
    limit: usize,
) -> StoreResult<Vec<NotificationOutboxEntry>> {
    let tx = conn.transaction()?;

    let ids: Vec<String> = {
        let mut stmt = tx.prepare_cached(
            "SELECT id FROM notification_outbox
             WHERE status = 'pending' AND claimed_by IS NULL AND scheduled_at <= ?1
             ORDER BY scheduled_at ASC, created_at ASC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![fmt_ts(now), limit as i64], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };

    let claim_ts = fmt_ts(now);
    let mut entries = Vec::with_capacity(ids.len());
    for id in &ids {
        let updated = tx.execute(
            "UPDATE notification_outbox
             SET claimed_by = ?1, claimed_at = ?2, updated_at = ?2
             WHERE id = ?3 AND status = 'pending' AND claimed_by IS NULL",
            params![worker_id, claim_ts, id],
        )?;
        if updated == 1 {
            if let Some(entry) = get_notification(&tx, id)? {
                entries.push(entry);
            }
        }
    }

    tx.commit()?;
    Ok(entries)
}

/// Terminal success: bump attempts, clear the error and the claim.
pub fn mark_notification_success(conn: &Connection, id: &str, now: DateTime<Utc>) -> StoreResult<bool> {
    let updated = conn.execute(
        "UPDATE notification_outbox
         SET status = 'success', attempts = attempts + 1, last_error = NULL,
             claimed_by = NULL, claimed_at = NULL, updated_at = ?1
         WHERE id = ?2 AND status = 'pending'",
        params![fmt_ts(now), id],
    )?;
    Ok(updated == 1)
}

/// Reschedule for retry: persist the new attempt count, error, and the
/// forward-moved `scheduled_at`.
pub fn mark_notification_retry(
    conn: &Connection,
    id: &str,
    attempts: i64,
    error: &str,
    next_scheduled_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> StoreResult<bool> {
    let updated = conn.execute(
        "UPDATE notification_outbox
         SET status = 'pending', attempts = ?1, last_error = ?2, scheduled_at = ?3,
             claimed_by = NULL, claimed_at = NULL, updated_at = ?4
         WHERE id = ?5 AND status = 'pending'",
        params![attempts, error, fmt_ts(next_scheduled_at), fmt_ts(now), id],
    )?;
    Ok(updated == 1)
}

/// Dead-letter after the retry budget is exhausted (or on a non-retryable
/// error). `scheduled_at` is left untouched.
pub fn mark_notification_dead_letter(
    conn: &Connection,
    id: &str,
    attempts: i64,
    error: &str,
    now: DateTime<Utc>,
) -> StoreResult<bool> {
    let updated = conn.execute(
        "UPDATE notification_outbox
         SET status = 'failed', attempts = ?1, last_error = ?2,
             claimed_by = NULL, claimed_at = NULL, updated_at = ?3
         WHERE id = ?4 AND status = 'pending'",
        params![attempts, error, fmt_ts(now), id],
    )?;
    Ok(updated == 1)
}

/// Clear a claim without touching attempts or status. Used when a
/// cycle-level configuration error aborts a batch mid-flight.
pub fn release_notification_claim(conn: &Connection, id: &str, now: DateTime<Utc>) -> StoreResult<()> {
    conn.execute(
        "UPDATE notification_outbox
         SET claimed_by = NULL, claimed_at = NULL, updated_at = ?1
         WHERE id = ?2",
        params![fmt_ts(now), id],
    )?;
    Ok(())
}

/// Administrative requeue: reset a failed row to a fresh pending state.
///
/// Conditional on `status = 'failed'` so the reset cannot race an in-flight
/// claim or clobber a row that already succeeded. Returns whether a row was
/// actually updated.
pub fn requeue_notification(conn: &Connection, id: &str, now: DateTime<Utc>) -> StoreResult<bool> {
    let updated = conn.execute(
        "UPDATE notification_outbox
         SET status = 'pending', attempts = 0, last_error = NULL, scheduled_at = ?1,
             claimed_by = NULL, claimed_at = NULL, updated_at = ?1
         WHERE id = ?2 AND status = 'failed'",
        params![fmt_ts(now), id],
    )?;
    Ok(updated == 1)
}

/// Release claims older than the given cutoff (crash recovery on startup).
pub fn release_stale_notification_claims(
    conn: &Connection,
    older_than: DateTime<Utc>,
) -> StoreResult<usize> {
    let count = conn.execute(
        "UPDATE notification_outbox
         SET claimed_by = NULL, claimed_at = NULL
         WHERE status = 'pending' AND claimed_at IS NOT NULL AND claimed_at <= ?1",
        params![fmt_ts(older_than)],
    )?;
    Ok(count)
}

/// Row counts per status.
pub fn notification_queue_depth(conn: &Connection) -> StoreResult<QueueDepth> {
    queue_depth(conn, "notification_outbox")
}

// ==========================================
// Webhook endpoints
// ==========================================

/// Register a webhook endpoint.
pub fn insert_webhook_endpoint(
    conn: &Connection,
    endpoint: &NewWebhookEndpoint,
) -> StoreResult<WebhookEndpoint> {
    let id = uuid::Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO webhook_endpoints (id, url, description, is_active, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            id,
            endpoint.url,
            endpoint.description,
            endpoint.is_active,
            fmt_ts(Utc::now()),
        ],
    )?;
    get_webhook_endpoint(conn, &id)?
        .ok_or_else(|| StoreError::NotFound("endpoint not found after insert".to_string()))
}

/// Get a webhook endpoint by ID.
pub fn get_webhook_endpoint(conn: &Connection, id: &str) -> StoreResult<Option<WebhookEndpoint>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, url, description, is_active, created_at FROM webhook_endpoints WHERE id = ?1",
    )?;

    let result = stmt.query_row(params![id], |row| {
        Ok(WebhookEndpoint {
            id: row.get(0)?,
            url: row.get(1)?,
            description: row.get(2)?,
            is_active: row.get(3)?,
            created_at: parse_datetime(row.get::<_, String>(4)?),
        })
    });

    match result {
        Ok(endpoint) => Ok(Some(endpoint)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

// ==========================================
// Webhook deliveries
// ==========================================

fn map_webhook_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<WebhookDelivery> {
    Ok(WebhookDelivery {
        id: row.get(0)?,
        endpoint_id: row.get(1)?,
        event: row.get(2)?,
        payload: row.get(3)?,
        status: OutboxStatus::from_str(&row.get::<_, String>(4)?),
        attempts: row.get(5)?,
        last_error: row.get(6)?,
        signature_input: row.get(7)?,
        scheduled_at: parse_datetime(row.get::<_, String>(8)?),
        delivered_at: row.get::<_, Option<String>>(9)?.map(parse_datetime),
        claimed_by: row.get(10)?,
        claimed_at: row.get::<_, Option<String>>(11)?.map(parse_datetime),
        created_at: parse_datetime(row.get::<_, String>(12)?),
        updated_at: parse_datetime(row.get::<_, String>(13)?),
    })
}

const WEBHOOK_COLUMNS: &str = "id, endpoint_id, event, payload, status, attempts, last_error, \
     signature_input, scheduled_at, delivered_at, claimed_by, claimed_at, created_at, updated_at";

/// Enqueue a webhook delivery (producer side).
pub fn insert_webhook_delivery(
    conn: &Connection,
    delivery: &NewWebhookDelivery,
) -> StoreResult<WebhookDelivery> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = Utc::now();
    let scheduled_at = delivery.scheduled_at.unwrap_or(now);

    conn.execute(
        "INSERT INTO webhook_deliveries (id, endpoint_id, event, payload, status, attempts, scheduled_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 'pending', 0, ?5, ?6, ?6)",
        params![
            id,
            delivery.endpoint_id,
            delivery.event,
            serde_json::to_string(&delivery.payload)?,
            fmt_ts(scheduled_at),
            fmt_ts(now),
        ],
    )?;

    get_webhook_delivery(conn, &id)?
        .ok_or_else(|| StoreError::NotFound("delivery not found after insert".to_string()))
}

/// Get a webhook delivery by ID.
pub fn get_webhook_delivery(conn: &Connection, id: &str) -> StoreResult<Option<WebhookDelivery>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {WEBHOOK_COLUMNS} FROM webhook_deliveries WHERE id = ?1"
    ))?;

    let result = stmt.query_row(params![id], map_webhook_row);

    match result {
        Ok(delivery) => Ok(Some(delivery)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Atomically claim a batch of due webhook deliveries.
///
/// Same claim discipline as [`claim_notification_batch`].
pub fn claim_webhook_batch(
    conn: &mut Connection,
    worker_id: &str,
    now: DateTime<Utc>,
    limit: usize,
) -> StoreResult<Vec<WebhookDelivery>> {
    let tx = conn.transaction()?;

    let ids: Vec<String> = {
        let mut stmt = tx.prepare_cached(
            "SELECT id FROM webhook_deliveries
             WHERE status = 'pending' AND claimed_by IS NULL AND scheduled_at <= ?1
             ORDER BY scheduled_at ASC, created_at ASC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![fmt_ts(now), limit as i64], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };

    let claim_ts = fmt_ts(now);
    let mut deliveries = Vec::with_capacity(ids.len());
    for id in &ids {
        let updated = tx.execute(
            "UPDATE webhook_deliveries
             SET claimed_by = ?1, claimed_at = ?2, updated_at = ?2
             WHERE id = ?3 AND status = 'pending' AND claimed_by IS NULL",
            params![worker_id, claim_ts, id],
        )?;
        if updated == 1 {
            if let Some(delivery) = get_webhook_delivery(&tx, id)? {
                deliveries.push(delivery);
            }
        }
    }

    tx.commit()?;
    Ok(deliveries)
}

/// Terminal success: bump attempts, clear the error and the claim, stamp
/// `delivered_at`.
pub fn mark_webhook_success(conn: &Connection, id: &str, now: DateTime<Utc>) -> StoreResult<bool> {
    let updated = conn.execute(
        "UPDATE webhook_deliveries
         SET status = 'success', attempts = attempts + 1, last_error = NULL,
             delivered_at = ?1, claimed_by = NULL, claimed_at = NULL, updated_at = ?1
         WHERE id = ?2 AND status = 'pending'",
        params![fmt_ts(now), id],
    )?;
    Ok(updated == 1)
}

/// Reschedule a webhook delivery for retry.
pub fn mark_webhook_retry(
    conn: &Connection,
    id: &str,
    attempts: i64,
    error: &str,
    next_scheduled_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> StoreResult<bool> {
    let updated = conn.execute(
        "UPDATE webhook_deliveries
         SET status = 'pending', attempts = ?1, last_error = ?2, scheduled_at = ?3,
             claimed_by = NULL, claimed_at = NULL, updated_at = ?4
         WHERE id = ?5 AND status = 'pending'",
        params![attempts, error, fmt_ts(next_scheduled_at), fmt_ts(now), id],
    )?;
    Ok(updated == 1)
}

/// Dead-letter a webhook delivery. `scheduled_at` is left untouched.
pub fn mark_webhook_dead_letter(
    conn: &Connection,
    id: &str,
    attempts: i64,
    error: &str,
    now: DateTime<Utc>,
) -> StoreResult<bool> {
    let updated = conn.execute(
        "UPDATE webhook_deliveries
         SET status = 'failed', attempts = ?1, last_error = ?2,
             claimed_by = NULL, claimed_at = NULL, updated_at = ?3
         WHERE id = ?4 AND status = 'pending'",
        params![attempts, error, fmt_ts(now), id],
    )?;
    Ok(updated == 1)
}

/// Clear a webhook claim without touching attempts or status.
pub fn release_webhook_claim(conn: &Connection, id: &str, now: DateTime<Utc>) -> StoreResult<()> {
    conn.execute(
        "UPDATE webhook_deliveries
         SET claimed_by = NULL, claimed_at = NULL, updated_at = ?1
         WHERE id = ?2",
        params![fmt_ts(now), id],
    )?;
    Ok(())
}

/// Persist the exact string that was signed for this delivery attempt.
pub fn record_webhook_signature_input(
    conn: &Connection,
    id: &str,
    signature_input: &str,
) -> StoreResult<()> {
    conn.execute(
        "UPDATE webhook_deliveries SET signature_input = ?1 WHERE id = ?2",
        params![signature_input, id],
    )?;
    Ok(())
}

/// Administrative requeue for a failed webhook delivery.
pub fn requeue_webhook(conn: &Connection, id: &str, now: DateTime<Utc>) -> StoreResult<bool> {
    let updated = conn.execute(
        "UPDATE webhook_deliveries
         SET status = 'pending', attempts = 0, last_error = NULL, scheduled_at = ?1,
             claimed_by = NULL, claimed_at = NULL, updated_at = ?1
         WHERE id = ?2 AND status = 'failed'",
        params![fmt_ts(now), id],
    )?;
    Ok(updated == 1)
}

/// Release webhook claims older than the given cutoff.
pub fn release_stale_webhook_claims(
    conn: &Connection,
    older_than: DateTime<Utc>,
) -> StoreResult<usize> {
    let count = conn.execute(
        "UPDATE webhook_deliveries
         SET claimed_by = NULL, claimed_at = NULL
         WHERE status = 'pending' AND claimed_at IS NOT NULL AND claimed_at <= ?1",
        params![fmt_ts(older_than)],
    )?;
    Ok(count)
}

/// Row counts per status.
pub fn webhook_queue_depth(conn: &Connection) -> StoreResult<QueueDepth> {
    queue_depth(conn, "webhook_deliveries")
}

fn queue_depth(conn: &Connection, table: &str) -> StoreResult<QueueDepth> {
    let mut stmt =
        conn.prepare(&format!("SELECT status, COUNT(*) FROM {table} GROUP BY status"))?;

    let mut depth = QueueDepth::default();
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;
    for row in rows {
        let (status, count) = row?;
        match OutboxStatus::from_str(&status) {
            OutboxStatus::Pending => depth.pending = count,
            OutboxStatus::Success => depth.success = count,
            OutboxStatus::Failed => depth.failed = count,
        }
    }
    Ok(depth)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{run_migrations, NotificationChannel};
    use chrono::Duration;
    use serde_json::json;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    fn sample_notification(event: &str) -> NewNotificationOutboxEntry {
        NewNotificationOutboxEntry {
            event: event.to_string(),
            channel: NotificationChannel::Email,
            payload: json!({"variables": {"guestName": "Ana"}}),
            guest_contact: "enc:v1:abcdef".to_string(),
            language: "en".to_string(),
            scheduled_at: None,
        }
    }

    fn sample_endpoint(conn: &Connection) -> WebhookEndpoint {
        insert_webhook_endpoint(
            conn,
            &NewWebhookEndpoint {
                url: "https://integrator.example/hooks".to_string(),
                description: Some("POS integration".to_string()),
                is_active: true,
            },
        )
        .unwrap()
    }

    #[test]
    fn insert_and_get_notification() {
        let conn = test_conn();
        let entry = insert_notification(&conn, &sample_notification("reservation.created")).unwrap();

        assert_eq!(entry.status, OutboxStatus::Pending);
        assert_eq!(entry.attempts, 0);
        assert!(entry.last_error.is_none());
        assert!(entry.claimed_by.is_none());

        let fetched = get_notification(&conn, &entry.id).unwrap().unwrap();
        assert_eq!(fetched.event, "reservation.created");
        assert_eq!(fetched.channel, "email");
    }

    #[test]
    fn claim_returns_due_rows_in_schedule_order() {
        let mut conn = test_conn();
        let now = Utc::now();

        let mut late = sample_notification("reservation.created");
        late.scheduled_at = Some(now - Duration::minutes(1));
        let mut early = sample_notification("reservation.cancelled");
        early.scheduled_at = Some(now - Duration::minutes(10));
        let mut future = sample_notification("reservation.reminder");
        future.scheduled_at = Some(now + Duration::minutes(10));

        let late = insert_notification(&conn, &late).unwrap();
        let early = insert_notification(&conn, &early).unwrap();
        insert_notification(&conn, &future).unwrap();

        let batch = claim_notification_batch(&mut conn, "worker-a", now, 10).unwrap();

        let ids: Vec<&str> = batch.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec![early.id.as_str(), late.id.as_str()]);
        assert!(batch.iter().all(|e| e.claimed_by.as_deref() == Some("worker-a")));
    }

    #[test]
    fn claimed_rows_are_invisible_to_second_claimant() {
        let mut conn = test_conn();
        let now = Utc::now();
        insert_notification(&conn, &sample_notification("reservation.created")).unwrap();

        let first = claim_notification_batch(&mut conn, "worker-a", now, 10).unwrap();
        assert_eq!(first.len(), 1);

        let second = claim_notification_batch(&mut conn, "worker-b", now, 10).unwrap();
        assert!(second.is_empty());
    }

    #[test]
    fn claim_respects_limit() {
        let mut conn = test_conn();
        let now = Utc::now();
        for _ in 0..5 {
            insert_notification(&conn, &sample_notification("reservation.created")).unwrap();
        }

        let batch = claim_notification_batch(&mut conn, "worker-a", now, 2).unwrap();
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn success_bumps_attempts_and_clears_error() {
        let conn = test_conn();
        let now = Utc::now();
        let entry = insert_notification(&conn, &sample_notification("reservation.created")).unwrap();

        mark_notification_retry(&conn, &entry.id, 1, "smtp timeout", now, now).unwrap();
        assert!(mark_notification_success(&conn, &entry.id, now).unwrap());

        let entry = get_notification(&conn, &entry.id).unwrap().unwrap();
        assert_eq!(entry.status, OutboxStatus::Success);
        assert_eq!(entry.attempts, 2);
        assert!(entry.last_error.is_none());
        assert!(entry.claimed_by.is_none());
    }

    #[test]
    fn terminal_rows_never_transition_again() {
        let conn = test_conn();
        let now = Utc::now();
        let entry = insert_notification(&conn, &sample_notification("reservation.created")).unwrap();

        assert!(mark_notification_success(&conn, &entry.id, now).unwrap());
        assert!(!mark_notification_success(&conn, &entry.id, now).unwrap());
        assert!(!mark_notification_retry(&conn, &entry.id, 5, "err", now, now).unwrap());
        assert!(!mark_notification_dead_letter(&conn, &entry.id, 5, "err", now).unwrap());

        let entry = get_notification(&conn, &entry.id).unwrap().unwrap();
        assert_eq!(entry.status, OutboxStatus::Success);
        assert_eq!(entry.attempts, 1);
    }

    #[test]
    fn dead_letter_keeps_scheduled_at() {
        let conn = test_conn();
        let now = Utc::now();
        let entry = insert_notification(&conn, &sample_notification("reservation.created")).unwrap();

        let retry_at = now + Duration::minutes(2);
        mark_notification_retry(&conn, &entry.id, 1, "gateway 503", retry_at, now).unwrap();
        mark_notification_dead_letter(&conn, &entry.id, 2, "gateway 503", now).unwrap();

        let entry = get_notification(&conn, &entry.id).unwrap().unwrap();
        assert_eq!(entry.status, OutboxStatus::Failed);
        assert_eq!(entry.attempts, 2);
        assert_eq!(entry.last_error.as_deref(), Some("gateway 503"));
        // scheduled_at stays at its last retry value
        assert_eq!(fmt_ts(entry.scheduled_at), fmt_ts(retry_at));
    }

    #[test]
    fn requeue_resets_failed_row() {
        let conn = test_conn();
        let now = Utc::now();
        let entry = insert_notification(&conn, &sample_notification("reservation.created")).unwrap();

        mark_notification_dead_letter(&conn, &entry.id, 8, "gave up", now).unwrap();

        let later = now + Duration::hours(1);
        assert!(requeue_notification(&conn, &entry.id, later).unwrap());

        let entry = get_notification(&conn, &entry.id).unwrap().unwrap();
        assert_eq!(entry.status, OutboxStatus::Pending);
        assert_eq!(entry.attempts, 0);
        assert!(entry.last_error.is_none());
        assert_eq!(fmt_ts(entry.scheduled_at), fmt_ts(later));
    }

    #[test]
    fn requeue_is_a_noop_on_non_failed_rows() {
        let conn = test_conn();
        let now = Utc::now();
        let pending = insert_notification(&conn, &sample_notification("a")).unwrap();
        let succeeded = insert_notification(&conn, &sample_notification("b")).unwrap();
        mark_notification_success(&conn, &succeeded.id, now).unwrap();

        assert!(!requeue_notification(&conn, &pending.id, now).unwrap());
        assert!(!requeue_notification(&conn, &succeeded.id, now).unwrap());
        assert!(!requeue_notification(&conn, "no-such-id", now).unwrap());
    }

    #[test]
    fn release_claim_restores_claimability() {
        let mut conn = test_conn();
        let now = Utc::now();
        let entry = insert_notification(&conn, &sample_notification("reservation.created")).unwrap();

        claim_notification_batch(&mut conn, "worker-a", now, 10).unwrap();
        release_notification_claim(&conn, &entry.id, now).unwrap();

        let batch = claim_notification_batch(&mut conn, "worker-b", now, 10).unwrap();
        assert_eq!(batch.len(), 1);
        // attempts untouched by release
        assert_eq!(batch[0].attempts, 0);
    }

    #[test]
    fn stale_claims_are_released_by_cutoff() {
        let mut conn = test_conn();
        let now = Utc::now();
        insert_notification(&conn, &sample_notification("reservation.created")).unwrap();

        claim_notification_batch(&mut conn, "worker-a", now, 10).unwrap();

        // Cutoff before the claim: nothing released
        let released =
            release_stale_notification_claims(&conn, now - Duration::minutes(5)).unwrap();
        assert_eq!(released, 0);

        // Cutoff after the claim: released and claimable again
        let released =
            release_stale_notification_claims(&conn, now + Duration::minutes(5)).unwrap();
        assert_eq!(released, 1);

        let batch = claim_notification_batch(&mut conn, "worker-b", now, 10).unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn webhook_claim_and_success_sets_delivered_at() {
        let mut conn = test_conn();
        let now = Utc::now();
        let endpoint = sample_endpoint(&conn);

        let delivery = insert_webhook_delivery(
            &conn,
            &NewWebhookDelivery {
                endpoint_id: endpoint.id.clone(),
                event: "reservation.created".to_string(),
                payload: json!({"data": {"reservationId": "r-1"}}),
                scheduled_at: None,
            },
        )
        .unwrap();

        let batch = claim_webhook_batch(&mut conn, "worker-a", now, 10).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].endpoint_id, endpoint.id);

        assert!(mark_webhook_success(&conn, &delivery.id, now).unwrap());

        let delivery = get_webhook_delivery(&conn, &delivery.id).unwrap().unwrap();
        assert_eq!(delivery.status, OutboxStatus::Success);
        assert_eq!(delivery.attempts, 1);
        assert!(delivery.delivered_at.is_some());
    }

    #[test]
    fn webhook_signature_input_is_persisted_verbatim() {
        let conn = test_conn();
        let endpoint = sample_endpoint(&conn);
        let delivery = insert_webhook_delivery(
            &conn,
            &NewWebhookDelivery {
                endpoint_id: endpoint.id,
                event: "reservation.created".to_string(),
                payload: json!({"data": {}}),
                scheduled_at: None,
            },
        )
        .unwrap();

        let input = r#"1700000000.{"a":1}"#;
        record_webhook_signature_input(&conn, &delivery.id, input).unwrap();

        let delivery = get_webhook_delivery(&conn, &delivery.id).unwrap().unwrap();
        assert_eq!(delivery.signature_input.as_deref(), Some(input));
    }

    #[test]
    fn webhook_retry_then_dead_letter_flow() {
        let mut conn = test_conn();
        let now = Utc::now();
        let endpoint = sample_endpoint(&conn);
        let delivery = insert_webhook_delivery(
            &conn,
            &NewWebhookDelivery {
                endpoint_id: endpoint.id,
                event: "reservation.created".to_string(),
                payload: json!({"data": {}}),
                scheduled_at: None,
            },
        )
        .unwrap();

        // Attempt 1 fails
        claim_webhook_batch(&mut conn, "worker-a", now, 10).unwrap();
        mark_webhook_retry(&conn, &delivery.id, 1, "HTTP 500", now + Duration::minutes(1), now)
            .unwrap();

        let row = get_webhook_delivery(&conn, &delivery.id).unwrap().unwrap();
        assert_eq!(row.attempts, 1);
        assert_eq!(row.status, OutboxStatus::Pending);

        // Attempt 2 fails
        let t2 = now + Duration::minutes(1);
        claim_webhook_batch(&mut conn, "worker-a", t2, 10).unwrap();
        mark_webhook_retry(&conn, &delivery.id, 2, "HTTP 500", t2 + Duration::minutes(2), t2)
            .unwrap();

        // Attempt 3 dead-letters
        let t3 = t2 + Duration::minutes(2);
        claim_webhook_batch(&mut conn, "worker-a", t3, 10).unwrap();
        mark_webhook_dead_letter(&conn, &delivery.id, 3, "HTTP 500", t3).unwrap();

        let row = get_webhook_delivery(&conn, &delivery.id).unwrap().unwrap();
        assert_eq!(row.status, OutboxStatus::Failed);
        assert_eq!(row.attempts, 3);
        assert_eq!(row.last_error.as_deref(), Some("HTTP 500"));
        // scheduled_at unchanged from its last retry value
        assert_eq!(fmt_ts(row.scheduled_at), fmt_ts(t2 + Duration::minutes(2)));

        // Requeue brings it back
        assert!(requeue_webhook(&conn, &delivery.id, t3).unwrap());
        let row = get_webhook_delivery(&conn, &delivery.id).unwrap().unwrap();
        assert_eq!(row.status, OutboxStatus::Pending);
        assert_eq!(row.attempts, 0);
    }

    #[test]
    fn queue_depth_counts_by_status() {
        let conn = test_conn();
        let now = Utc::now();

        let a = insert_notification(&conn, &sample_notification("a")).unwrap();
        let b = insert_notification(&conn, &sample_notification("b")).unwrap();
        insert_notification(&conn, &sample_notification("c")).unwrap();

        mark_notification_success(&conn, &a.id, now).unwrap();
        mark_notification_dead_letter(&conn, &b.id, 8, "gave up", now).unwrap();

        let depth = notification_queue_depth(&conn).unwrap();
        assert_eq!(depth.pending, 1);
        assert_eq!(depth.success, 1);
        assert_eq!(depth.failed, 1);
    }
}
