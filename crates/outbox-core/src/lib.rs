//! Shared kernel for the outbox delivery workers.
//!
//! This crate provides:
//! - DeliveryError: the error taxonomy the dispatcher translates into
//!   state transitions
//! - BackoffPolicy: exponential retry delay with a cap
//! - Clock: injectable time source so tests can fast-forward retries
//! - Typed payloads validated at claim time

mod backoff;
mod clock;
mod error;
mod payload;

pub use backoff::BackoffPolicy;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{DeliveryError, DeliveryResult};
pub use payload::{NotificationPayload, WebhookPayload};
