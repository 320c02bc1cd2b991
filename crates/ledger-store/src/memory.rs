use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    ItemId, LedgerStoreError, Result, StockRecord,
    store::{LedgerStore, Transform},
};

/// In-memory ledger store implementation for testing.
///
/// Provides the same interface as the PostgreSQL implementation. The write
/// lock is only held for the synchronous transform, never across an await.
#[derive(Clone, Default)]
pub struct InMemoryLedgerStore {
    records: Arc<RwLock<HashMap<ItemId, StockRecord>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryLedgerStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail with [`LedgerStoreError::Unavailable`]
    /// until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Returns the number of items stored.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Returns true if no item has been written.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LedgerStoreError::Unavailable {
                attempts: 1,
                reason: "in-memory store switched off".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn read(&self, item_id: &ItemId) -> Result<Option<StockRecord>> {
        self.check_available()?;
        Ok(self.records.read().await.get(item_id).cloned())
    }

    async fn apply_atomic(
        &self,
        item_id: &ItemId,
        transform: Transform<'_>,
    ) -> Result<StockRecord> {
        self.check_available()?;

        let mut records = self.records.write().await;
        let current = records.get(item_id);
        let quantity = transform(current.map(|record| record.quantity))
            .ok_or_else(|| LedgerStoreError::Rejected(item_id.clone()))?;

        let record = match current {
            Some(existing) => existing.updated(quantity),
            None => StockRecord::created(item_id.clone(), quantity),
        };
        records.insert(item_id.clone(), record.clone());

        Ok(record)
    }
}
