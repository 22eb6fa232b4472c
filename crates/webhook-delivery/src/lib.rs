//! Signed webhook delivery to integrator endpoints.
//!
//! This crate provides:
//! - signing: HMAC-SHA256 payload signatures over `"<timestamp>.<body>"`
//! - WebhookClient: the HTTP POST with the platform's webhook headers
//! - WebhookProcessor: binds the webhook outbox table, the signer and the
//!   client into a dispatcher processor
//!
//! Delivery is at-least-once; receivers dedupe on the
//! `X-Reserve-Delivery` id.

mod client;
mod processor;
pub mod signing;

pub use client::{SignedRequest, WebhookClient};
pub use processor::WebhookProcessor;
