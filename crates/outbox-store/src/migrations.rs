//! Database migrations.
//!
//! Migrations are run in order and tracked in the `migrations` table.

use crate::StoreResult;
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version.
pub const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations.
pub fn run_migrations(conn: &Connection) -> StoreResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    info!(current_version, target_version = CURRENT_VERSION, "Running migrations");

    if current_version < 1 {
        migrate_v1_outbox_tables(conn)?;
    }
    if current_version < 2 {
        migrate_v2_row_claims(conn)?;
    }

    info!("Migrations complete");
    Ok(())
}

fn record_migration(conn: &Connection, version: i32, name: &str) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO migrations (version, name) VALUES (?1, ?2)",
        rusqlite::params![version, name],
    )?;
    debug!(version, name, "Migration applied");
    Ok(())
}

/// V1: notification outbox, webhook endpoints, webhook deliveries.
fn migrate_v1_outbox_tables(conn: &Connection) -> StoreResult<()> {
    info!("Applying migration v1: outbox tables");

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS notification_outbox (
            id TEXT PRIMARY KEY,
            event TEXT NOT NULL,
            channel TEXT NOT NULL,
            payload TEXT NOT NULL,
            guest_contact TEXT NOT NULL,
            language TEXT NOT NULL DEFAULT 'en',
            status TEXT NOT NULL DEFAULT 'pending',
            attempts INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            scheduled_at TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_notification_outbox_due
            ON notification_outbox(status, scheduled_at, created_at);
        ",
    )?;

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS webhook_endpoints (
            id TEXT PRIMARY KEY,
            url TEXT NOT NULL,
            description TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS webhook_deliveries (
            id TEXT PRIMARY KEY,
            endpoint_id TEXT NOT NULL REFERENCES webhook_endpoints(id),
            event TEXT NOT NULL,
            payload TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            attempts INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            signature_input TEXT,
            scheduled_at TEXT NOT NULL,
            delivered_at TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_webhook_deliveries_due
            ON webhook_deliveries(status, scheduled_at, created_at);
        CREATE INDEX IF NOT EXISTS idx_webhook_deliveries_endpoint
            ON webhook_deliveries(endpoint_id);
        ",
    )?;

    record_migration(conn, 1, "outbox_tables")?;
    Ok(())
}

/// V2: row-level claim columns so concurrent worker replicas never process
/// the same row twice.
fn migrate_v2_row_claims(conn: &Connection) -> StoreResult<()> {
    info!("Applying migration v2: row claims");

    conn.execute_batch(
        "
        ALTER TABLE notification_outbox ADD COLUMN claimed_by TEXT;
        ALTER TABLE notification_outbox ADD COLUMN claimed_at TEXT;
        ALTER TABLE webhook_deliveries ADD COLUMN claimed_by TEXT;
        ALTER TABLE webhook_deliveries ADD COLUMN claimed_at TEXT;

        CREATE INDEX IF NOT EXISTS idx_notification_outbox_claimed
            ON notification_outbox(claimed_at);
        CREATE INDEX IF NOT EXISTS idx_webhook_deliveries_claimed
            ON webhook_deliveries(claimed_at);
        ",
    )?;

    record_migration(conn, 2, "row_claims")?;
    Ok(())
}
