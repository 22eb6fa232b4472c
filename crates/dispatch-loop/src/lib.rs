//! Generic polling dispatcher for outbox work items.
//!
//! One dispatcher instance runs per worker type (notifications, webhooks).
//! Each cycle: check the enable flag, run the processor's configuration
//! preflight, claim a batch of due rows, process them sequentially in claim
//! order, then sleep one poll interval. Per-item failures are translated
//! into state transitions and never abort the rest of the batch; only a
//! configuration error does, because it would fail every remaining item the
//! same way.
//!
//! Cancellation stops new polling cycles; the in-flight item always
//! finishes its state transition first.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use outbox_core::{BackoffPolicy, Clock, DeliveryError};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Dispatcher configuration, shared shape for both worker types.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Feature flag: when false the cycle skips dequeuing entirely and rows
    /// remain untouched.
    pub enabled: bool,
    /// How long to sleep between polling cycles.
    pub poll_interval: Duration,
    /// Maximum rows to claim per cycle.
    pub batch_size: usize,
    /// Attempts before a row is dead-lettered.
    pub max_attempts: u32,
    /// Retry delay policy.
    pub backoff: BackoffPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval: Duration::from_secs(5),
            batch_size: 20,
            max_attempts: 8,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// A worker-type-specific processor the dispatcher drives.
///
/// Implementations bind a store table and a channel provider together:
/// `claim_due` and the `mark_*` methods map to store transitions, `deliver`
/// invokes the external side effect.
#[async_trait]
pub trait OutboxProcessor: Send + Sync {
    type Item: Send + Sync;

    /// Worker type label used in logs.
    fn kind(&self) -> &'static str;

    /// Cycle-level configuration check, run before any dequeuing. An error
    /// here fails the cycle closed: nothing is claimed, nothing delivered.
    fn preflight(&self) -> Result<(), DeliveryError>;

    /// Claim up to `limit` due rows, earliest-due-first.
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Self::Item>, DeliveryError>;

    fn item_id<'a>(&self, item: &'a Self::Item) -> &'a str;

    /// Attempts already consumed by this item.
    fn item_attempts(&self, item: &Self::Item) -> i64;

    /// Execute the external side effect for one item.
    async fn deliver(&self, item: &Self::Item, attempt: i64) -> Result<(), DeliveryError>;

    async fn mark_success(&self, item: &Self::Item, now: DateTime<Utc>)
        -> Result<(), DeliveryError>;

    async fn mark_retry(
        &self,
        item: &Self::Item,
        attempts: i64,
        error: &str,
        next_scheduled_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), DeliveryError>;

    async fn mark_dead_letter(
        &self,
        item: &Self::Item,
        attempts: i64,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), DeliveryError>;

    /// Clear the claim without consuming an attempt (cycle abort path).
    async fn release_claim(
        &self,
        item: &Self::Item,
        now: DateTime<Utc>,
    ) -> Result<(), DeliveryError>;
}

enum ItemOutcome {
    Continue,
    AbortCycle,
}

/// Long-lived polling loop around an [`OutboxProcessor`].
pub struct Dispatcher<P: OutboxProcessor> {
    processor: P,
    config: DispatcherConfig,
    clock: Arc<dyn Clock>,
    shutdown: CancellationToken,
}

impl<P: OutboxProcessor> Dispatcher<P> {
    pub fn new(
        processor: P,
        config: DispatcherConfig,
        clock: Arc<dyn Clock>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            processor,
            config,
            clock,
            shutdown,
        }
    }

    /// Run until the shutdown token is cancelled.
    pub async fn run(&self) {
        info!(
            worker = self.processor.kind(),
            enabled = self.config.enabled,
            batch_size = self.config.batch_size,
            max_attempts = self.config.max_attempts,
            "dispatcher starting"
        );

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            if self.config.enabled {
                if let Err(e) = self.run_cycle().await {
                    // Store unreachable or similar: back off one interval
                    error!(worker = self.processor.kind(), error = %e, "cycle failed");
                }
            } else {
                debug!(worker = self.processor.kind(), "dispatcher disabled, skipping cycle");
            }

            tokio::select! {
                _ = self.clock.sleep(self.config.poll_interval) => {}
                _ = self.shutdown.cancelled() => break,
            }
        }

        info!(worker = self.processor.kind(), "dispatcher stopped");
    }

    /// One poll cycle: preflight, claim, process each claimed item.
    ///
    /// Public so tests and operator tooling can drive the loop one cycle at
    /// a time.
    pub async fn run_cycle(&self) -> Result<(), DeliveryError> {
        if let Err(e) = self.processor.preflight() {
            // Fail closed: leave the queue untouched rather than deliver
            // misconfigured side effects.
            warn!(
                worker = self.processor.kind(),
                error = %e,
                "preflight failed, skipping cycle without dequeuing"
            );
            return Ok(());
        }

        let now = self.clock.now();
        let batch = self
            .processor
            .claim_due(now, self.config.batch_size)
            .await?;
        if batch.is_empty() {
            return Ok(());
        }

        debug!(
            worker = self.processor.kind(),
            batch_size = batch.len(),
            "processing batch"
        );

        let mut items = batch.iter();
        while let Some(item) = items.next() {
            if self.shutdown.is_cancelled() {
                self.release_remaining(item, &mut items).await;
                break;
            }

            match self.process_item(item).await {
                ItemOutcome::Continue => {}
                ItemOutcome::AbortCycle => {
                    self.release_remaining(item, &mut items).await;
                    break;
                }
            }
        }

        Ok(())
    }

    /// Release the claims of items the cycle will no longer process, so
    /// they become immediately claimable again instead of waiting out the
    /// stale-claim lease.
    async fn release_remaining<'a>(
        &self,
        current: &'a P::Item,
        rest: &mut std::slice::Iter<'a, P::Item>,
    ) {
        for item in std::iter::once(current).chain(rest) {
            if let Err(e) = self.processor.release_claim(item, self.clock.now()).await {
                error!(
                    worker = self.processor.kind(),
                    item_id = self.processor.item_id(item),
                    error = %e,
                    "failed to release claim"
                );
            }
        }
    }

    async fn process_item(&self, item: &P::Item) -> ItemOutcome {
        let id = self.processor.item_id(item);
        let attempt = self.processor.item_attempts(item) + 1;

        let result = self.processor.deliver(item, attempt).await;

        let transition = match result {
            Ok(()) => {
                info!(
                    worker = self.processor.kind(),
                    item_id = id,
                    attempt,
                    "delivered"
                );
                self.processor.mark_success(item, self.clock.now()).await
            }
            Err(DeliveryError::Configuration(msg)) => {
                // A missing secret or credential fails every item the same
                // way; abort the cycle and leave the row unconsumed.
                error!(
                    worker = self.processor.kind(),
                    item_id = id,
                    error = %msg,
                    "configuration error, aborting cycle"
                );
                return ItemOutcome::AbortCycle;
            }
            Err(err @ (DeliveryError::PermanentPayload(_) | DeliveryError::UnknownChannel(_))) => {
                warn!(
                    worker = self.processor.kind(),
                    item_id = id,
                    attempt,
                    error = %err,
                    "non-retryable failure, dead-lettering"
                );
                self.processor
                    .mark_dead_letter(item, attempt, &err.to_string(), self.clock.now())
                    .await
            }
            Err(err) => {
                // Transient (and anything else) consumes a retry
                if attempt >= i64::from(self.config.max_attempts) {
                    warn!(
                        worker = self.processor.kind(),
                        item_id = id,
                        attempt,
                        error = %err,
                        "retry budget exhausted, dead-lettering"
                    );
                    self.processor
                        .mark_dead_letter(item, attempt, &err.to_string(), self.clock.now())
                        .await
                } else {
                    let now = self.clock.now();
                    let next = now + self.config.backoff.delay(attempt as u32);
                    debug!(
                        worker = self.processor.kind(),
                        item_id = id,
                        attempt,
                        next_attempt_at = %next,
                        error = %err,
                        "delivery failed, retry scheduled"
                    );
                    self.processor
                        .mark_retry(item, attempt, &err.to_string(), next, now)
                        .await
                }
            }
        };

        if let Err(e) = transition {
            // The transition itself failed (store hiccup). The claim stays
            // in place and the stale-claim lease will surface the row again.
            error!(
                worker = self.processor.kind(),
                item_id = id,
                error = %e,
                "state transition failed"
            );
        }

        ItemOutcome::Continue
    }
}
