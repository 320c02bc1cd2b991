use thiserror::Error;

use crate::ItemId;

/// Errors that can occur when interacting with the ledger store.
#[derive(Debug, Error)]
pub enum LedgerStoreError {
    /// The backend could not complete the operation within its retry policy.
    #[error("Store unavailable after {attempts} attempt(s): {reason}")]
    Unavailable { attempts: u32, reason: String },

    /// The transform refused to produce a new quantity; nothing was written.
    #[error("Mutation rejected for item {0}")]
    Rejected(ItemId),

    /// Another writer created the row between our read and our insert.
    #[error("Concurrent insert for item {0}")]
    InsertRace(ItemId),

    /// The connection broke around `COMMIT` and the stored row could not
    /// show whether the write landed. Never retried.
    #[error("Commit outcome unknown for item {item_id}: {reason}")]
    CommitUnknown { item_id: ItemId, reason: String },

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl LedgerStoreError {
    /// Whether a fresh attempt of the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            LedgerStoreError::InsertRace(_) => true,
            LedgerStoreError::Database(err) => crate::retry::is_transient(err),
            _ => false,
        }
    }

    /// Converts a backend failure into [`LedgerStoreError::Unavailable`] once
    /// no further attempts will be made. Rejections pass through unchanged.
    pub fn exhausted(self, attempts: u32) -> Self {
        match self {
            LedgerStoreError::Database(_)
            | LedgerStoreError::InsertRace(_)
            | LedgerStoreError::CommitUnknown { .. } => {
                LedgerStoreError::Unavailable {
                    attempts,
                    reason: self.to_string(),
                }
            }
            other => other,
        }
    }
}

/// Result type for ledger store operations.
pub type Result<T> = std::result::Result<T, LedgerStoreError>;
