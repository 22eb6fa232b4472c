//! Worker wiring and lifecycle.

use crate::config::WorkerConfig;
use anyhow::Context;
use chrono::Utc;
use contact_cipher::PiiCipher;
use dispatch_loop::{Dispatcher, DispatcherConfig};
use notify_channels::{
    ContactCipher, HttpMailGateway, HttpSmsGateway, MailTransport, NotificationProcessor,
    SenderIdentity, SmsTransport,
};
use notify_templates::TemplateStore;
use outbox_core::{BackoffPolicy, Clock, SystemClock};
use outbox_store::OutboxDb;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use webhook_delivery::{WebhookClient, WebhookProcessor};

/// Run both delivery workers until a shutdown signal arrives.
pub async fn run_workers(config: WorkerConfig) -> anyhow::Result<()> {
    let db = OutboxDb::open(&config.db_path)
        .await
        .context("opening outbox database")?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // Crash recovery: rows claimed by a previous process that never
    // transitioned become claimable again.
    let released = db
        .release_stale_claims(clock.now() - config.claim_lease)
        .await?;
    if released > 0 {
        info!(released, "released stale claims from a previous run");
    }

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    let dispatcher_config = DispatcherConfig {
        enabled: config.enabled,
        poll_interval: config.poll_interval,
        batch_size: config.batch_size,
        max_attempts: config.max_attempts,
        backoff: BackoffPolicy::new(config.backoff_cap_minutes),
    };

    // A malformed PII key refuses to start; a missing one starts the worker
    // but fails the notification cycle closed until an operator sets it.
    let cipher: Option<Arc<dyn ContactCipher>> = match &config.pii_key {
        Some(encoded) => {
            let key = PiiCipher::parse_key(encoded).context("RESERVE_PII_KEY")?;
            Some(Arc::new(PiiCipher::with_key(key)))
        }
        None => {
            warn!("RESERVE_PII_KEY not set, notification cycles will be skipped");
            None
        }
    };

    let mail: Arc<dyn MailTransport> = Arc::new(HttpMailGateway::new(
        config.mail_api_url.clone(),
        config.mail_api_key.clone().unwrap_or_default(),
    ));
    let sms: Option<Arc<dyn SmsTransport>> = match (
        config.sms_api_url.clone(),
        config.sms_api_key.clone(),
        &config.from_number,
    ) {
        (Some(url), Some(key), Some(_)) => Some(Arc::new(HttpSmsGateway::new(url, key))),
        _ => {
            warn!("SMS gateway not configured, SMS rows will fail the notification cycle closed");
            None
        }
    };

    if config.webhook_secret.is_none() {
        warn!("RESERVE_WEBHOOK_SECRET not set, webhook cycles will be skipped");
    }

    let notifications = Dispatcher::new(
        NotificationProcessor::new(
            db.clone(),
            Arc::new(TemplateStore::new(&config.template_dir)),
            cipher,
            mail,
            sms,
            SenderIdentity {
                from_email: config.from_email.clone(),
                from_number: config.from_number.clone(),
            },
        ),
        dispatcher_config.clone(),
        clock.clone(),
        shutdown.clone(),
    );

    let webhooks = Dispatcher::new(
        WebhookProcessor::new(
            db.clone(),
            WebhookClient::new(),
            config.webhook_secret.clone(),
            clock.clone(),
        ),
        dispatcher_config,
        clock.clone(),
        shutdown.clone(),
    );

    info!(db_path = %config.db_path.display(), "delivery workers starting");
    tokio::join!(notifications.run(), webhooks.run());
    info!("delivery workers stopped");

    Ok(())
}

/// Administrative requeue of dead-lettered rows.
pub async fn requeue(
    config: &WorkerConfig,
    notification: Option<String>,
    webhook: Option<String>,
) -> anyhow::Result<()> {
    let db = OutboxDb::open(&config.db_path).await?;
    let now = Utc::now();

    if let Some(id) = notification {
        let updated = db.requeue_notification(&id, now).await?;
        print_requeue_result("notification", &id, updated);
    }
    if let Some(id) = webhook {
        let updated = db.requeue_webhook(&id, now).await?;
        print_requeue_result("webhook delivery", &id, updated);
    }

    Ok(())
}

fn print_requeue_result(kind: &str, id: &str, updated: bool) {
    if updated {
        println!("{kind} {id} requeued");
    } else {
        println!("{kind} {id} not requeued (not found or not in failed state)");
    }
}

/// Print queue depths for both outbox tables.
pub async fn status(config: &WorkerConfig) -> anyhow::Result<()> {
    let db = OutboxDb::open(&config.db_path).await?;

    let notifications = db.notification_queue_depth().await?;
    let webhooks = db.webhook_queue_depth().await?;

    println!(
        "notifications: {} pending, {} success, {} failed",
        notifications.pending, notifications.success, notifications.failed
    );
    println!(
        "webhooks:      {} pending, {} success, {} failed",
        webhooks.pending, webhooks.success, webhooks.failed
    );

    Ok(())
}

fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received, stopping after in-flight items");
        shutdown.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
