//! Intake error types.

use common::InvalidIdentifier;
use thiserror::Error;

/// A delivery whose payload can never become a valid decrement.
///
/// Malformed events are acknowledged and dropped, never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedEvent {
    #[error("payload is not a JSON event object: {0}")]
    NotJson(String),

    #[error("item_id is missing")]
    MissingItemId,

    #[error("item_id is invalid: {0}")]
    InvalidItemId(#[from] InvalidIdentifier),

    #[error("quantity is missing")]
    MissingQuantity,

    #[error("quantity must be a 64-bit integer, got {0}")]
    InvalidQuantity(String),

    #[error("quantity must be positive, got {0}")]
    NonPositiveQuantity(i64),
}

/// Errors talking to the event bus.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Event source closed")]
    Closed,
}

/// Errors surfaced by the intake loop.
#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),
}

/// Result type for intake operations.
pub type Result<T> = std::result::Result<T, IntakeError>;
