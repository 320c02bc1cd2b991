//! Ledger error types.

use common::{InvalidIdentifier, ItemId};
use ledger_store::LedgerStoreError;
use thiserror::Error;

/// Errors that can occur while reading or mutating the ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The item has never been written.
    #[error("Item not found: {0}")]
    NotFound(ItemId),

    /// Malformed caller input, or a mutation whose result is out of range.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The store could not complete the operation; the caller may retry.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[source] LedgerStoreError),

    /// The item's mutation worker went away before answering.
    #[error("Mutation worker for item {0} stopped before replying")]
    WorkerStopped(ItemId),
}

impl LedgerError {
    /// Whether repeating the same request later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::StoreUnavailable(_) | LedgerError::WorkerStopped(_)
        )
    }
}

impl From<LedgerStoreError> for LedgerError {
    fn from(err: LedgerStoreError) -> Self {
        match err {
            LedgerStoreError::Rejected(item_id) => LedgerError::InvalidArgument(format!(
                "resulting quantity for item {item_id} is out of range"
            )),
            other => LedgerError::StoreUnavailable(other),
        }
    }
}

impl From<InvalidIdentifier> for LedgerError {
    fn from(err: InvalidIdentifier) -> Self {
        LedgerError::InvalidArgument(format!("item_id: {err}"))
    }
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
