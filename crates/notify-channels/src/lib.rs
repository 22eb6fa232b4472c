//! Guest notification channels: email and SMS.
//!
//! This crate provides:
//! - MailTransport / SmsTransport: seams over the external gateways, with
//!   reqwest-backed implementations
//! - ContactCipher: the PII collaborator interface (implemented elsewhere)
//! - NotificationProcessor: binds the notification outbox table, the
//!   template renderer, and the transports into a dispatcher processor

mod pii;
mod processor;
mod transports;

pub use pii::{decrypt_contact, ContactCipher};
pub use processor::{NotificationProcessor, SenderIdentity};
pub use transports::{
    EmailMessage, HttpMailGateway, HttpSmsGateway, MailTransport, SmsMessage, SmsTransport,
};
