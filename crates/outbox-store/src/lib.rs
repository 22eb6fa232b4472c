//! Durable SQLite outbox for the delivery workers.
//!
//! This crate provides:
//! - Async SQLite executor with a dedicated thread
//! - Database migrations
//! - Model types for the notification and webhook outbox tables
//! - Claim/transition/requeue query helpers
//!
//! All mutations of outbox state flow through here. Rows are created by
//! producers (reservation and webhook-emission logic elsewhere in the
//! platform), claimed and transitioned by the dispatcher loops, and reset
//! by the administrative requeue operation. The engine never deletes rows;
//! terminal rows are retained for audit.

mod error;
mod executor;
mod migrations;
mod models;
pub mod queries;

pub use error::{StoreError, StoreResult};
pub use executor::OutboxDb;
pub use migrations::run_migrations;
pub use models::*;
