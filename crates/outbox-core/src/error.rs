//! Delivery error taxonomy.

use thiserror::Error;

/// Errors a delivery attempt can surface.
///
/// The dispatcher maps each variant to a state transition: `Transient`
/// consults the backoff policy, `PermanentPayload` and `UnknownChannel`
/// dead-letter immediately, `Configuration` aborts the cycle without
/// touching item state, and `Store` backs the whole loop off one poll
/// interval.
#[derive(Error, Debug)]
pub enum DeliveryError {
    /// Required secret or credential missing.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Network failure, non-2xx response, or transport rejection.
    #[error("transient delivery failure: {0}")]
    Transient(String),

    /// Stored payload failed schema validation.
    #[error("invalid payload: {0}")]
    PermanentPayload(String),

    /// Unsupported channel value on the row.
    #[error("unsupported channel: {0}")]
    UnknownChannel(String),

    /// Outbox store failure.
    #[error("store error: {0}")]
    Store(String),
}

impl DeliveryError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn permanent_payload(msg: impl Into<String>) -> Self {
        Self::PermanentPayload(msg.into())
    }

    /// Whether the failure should consume a retry from the budget.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Result type alias using DeliveryError.
pub type DeliveryResult<T> = Result<T, DeliveryError>;
