use async_trait::async_trait;

use crate::{ItemId, Result, StockRecord};

/// Computes an item's new quantity from its current one.
///
/// Receives `None` when the item has never been written. Returning `None`
/// rejects the mutation and leaves the stored row untouched.
pub type Transform<'a> = &'a (dyn Fn(Option<i64>) -> Option<i64> + Send + Sync);

/// Core trait for ledger store implementations.
///
/// A ledger store maps item ids to stock records and offers an atomic
/// read-modify-write per item. All implementations must be thread-safe.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Reads the current record for an item.
    ///
    /// Returns `None` if the item has never been written.
    async fn read(&self, item_id: &ItemId) -> Result<Option<StockRecord>>;

    /// Applies `transform` to the item's quantity inside a storage transaction.
    ///
    /// Concurrent calls for the same item are serializable (no lost update);
    /// calls for different items do not block each other. The new record is
    /// durable when this returns `Ok`.
    async fn apply_atomic(&self, item_id: &ItemId, transform: Transform<'_>)
    -> Result<StockRecord>;
}

/// Extension trait providing convenience methods for ledger stores.
#[async_trait]
pub trait LedgerStoreExt: LedgerStore {
    /// Returns the item's quantity, or `None` if it has never been written.
    async fn quantity(&self, item_id: &ItemId) -> Result<Option<i64>> {
        Ok(self.read(item_id).await?.map(|record| record.quantity))
    }

    /// Checks whether the item has ever been written.
    async fn contains(&self, item_id: &ItemId) -> Result<bool> {
        Ok(self.read(item_id).await?.is_some())
    }
}

// Blanket implementation for all LedgerStore implementations
impl<T: LedgerStore + ?Sized> LedgerStoreExt for T {}
