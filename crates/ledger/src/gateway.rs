//! Ledger gateway: the get / set / adjust surface used by request handlers.

use common::ItemId;
use ledger_store::{LedgerStore, StockRecord};

use crate::error::{LedgerError, Result};
use crate::mutation::{MutationKind, MutationRequest};
use crate::serializer::MutationSerializer;

/// Translates external calls into store reads and serialized mutations.
///
/// Holds a clone of the serializer shared with the event intake, so direct
/// writes and event-driven decrements queue behind each other per item.
#[derive(Clone)]
pub struct LedgerGateway<S: LedgerStore> {
    serializer: MutationSerializer<S>,
}

impl<S> LedgerGateway<S>
where
    S: LedgerStore + Clone + 'static,
{
    /// Creates a gateway submitting through the given serializer.
    pub fn new(serializer: MutationSerializer<S>) -> Self {
        Self { serializer }
    }

    /// Returns the serializer this gateway submits to.
    pub fn serializer(&self) -> &MutationSerializer<S> {
        &self.serializer
    }

    /// Reads an item's current record. Unseen items are [`LedgerError::NotFound`].
    #[tracing::instrument(skip(self))]
    pub async fn get(&self, item_id: &str) -> Result<StockRecord> {
        let item_id = ItemId::parse(item_id)?;
        self.serializer
            .store()
            .read(&item_id)
            .await?
            .ok_or(LedgerError::NotFound(item_id))
    }

    /// Replaces an item's quantity.
    #[tracing::instrument(skip(self))]
    pub async fn set(&self, item_id: &str, quantity: i64) -> Result<StockRecord> {
        self.submit(item_id, MutationKind::Set(quantity)).await
    }

    /// Adds a signed delta to an item's quantity.
    #[tracing::instrument(skip(self))]
    pub async fn adjust(&self, item_id: &str, delta: i64) -> Result<StockRecord> {
        self.submit(item_id, MutationKind::Adjust(delta)).await
    }

    /// Submits an already-parsed mutation as a direct request.
    pub async fn submit(&self, item_id: &str, kind: MutationKind) -> Result<StockRecord> {
        let item_id = ItemId::parse(item_id)?;
        let record = self
            .serializer
            .submit(MutationRequest::direct(item_id, kind))
            .await?;
        tracing::info!(
            item_id = %record.item_id,
            quantity = record.quantity,
            kind = kind.label(),
            "stock updated"
        );
        Ok(record)
    }
}
