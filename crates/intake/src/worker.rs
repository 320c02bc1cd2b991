//! The intake loop: fetch, de-duplicate, apply, acknowledge.

use std::time::{Duration, Instant};

use chrono::Utc;
use ledger::MutationSerializer;
use ledger_store::{LedgerStore, StockRecord};
use tokio::sync::watch;

use crate::dedup::RecencySet;
use crate::error::Result;
use crate::event::{DEFAULT_BUCKET_SECS, InventoryEvent};
use crate::source::{Delivery, EventSource};

/// Tuning for [`EventIntake`].
#[derive(Debug, Clone)]
pub struct IntakeConfig {
    /// Deliveries fetched per poll.
    pub batch_size: usize,
    /// First delay after a failed poll; doubles up to `max_backoff`.
    pub backoff: Duration,
    pub max_backoff: Duration,
    /// Recency set bounds.
    pub dedup_capacity: usize,
    pub dedup_ttl: Duration,
    /// Arrival bucket width for derived event ids, in seconds.
    pub bucket_secs: i64,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(10),
            dedup_capacity: 10_000,
            dedup_ttl: Duration::from_secs(3600),
            bucket_secs: DEFAULT_BUCKET_SECS,
        }
    }
}

/// What happened to a single delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// The decrement was applied; ack.
    Applied(StockRecord),
    /// The event id was applied recently; ack without applying.
    Duplicate,
    /// The event can never apply (malformed, or rejected by the ledger); ack.
    Discarded,
    /// The store is unavailable; release for redelivery.
    Deferred,
}

impl Disposition {
    pub fn label(&self) -> &'static str {
        match self {
            Disposition::Applied(_) => "applied",
            Disposition::Duplicate => "duplicate",
            Disposition::Discarded => "discarded",
            Disposition::Deferred => "deferred",
        }
    }
}

/// Result of one [`EventIntake::poll_once`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Every fetched delivery was settled.
    Processed(usize),
    /// The ledger was unavailable; the batch was released.
    Deferred,
}

/// Consumes order-created events and turns them into serialized decrements.
pub struct EventIntake<S: LedgerStore, B: EventSource> {
    serializer: MutationSerializer<S>,
    source: B,
    recent: RecencySet,
    config: IntakeConfig,
}

impl<S, B> EventIntake<S, B>
where
    S: LedgerStore + Clone + 'static,
    B: EventSource,
{
    /// Creates an intake submitting to a clone of the shared serializer.
    pub fn new(serializer: MutationSerializer<S>, source: B, config: IntakeConfig) -> Self {
        let recent = RecencySet::new(config.dedup_capacity, config.dedup_ttl);
        Self {
            serializer,
            source,
            recent,
            config,
        }
    }

    pub fn source(&self) -> &B {
        &self.source
    }

    /// Decides and applies a single delivery. Does not ack or release it.
    #[tracing::instrument(skip(self, delivery), fields(receipt = %delivery.receipt, redelivered = delivery.redelivered))]
    pub async fn process(&mut self, delivery: &Delivery) -> Disposition {
        let event = match InventoryEvent::decode(&delivery.payload) {
            Ok(event) => event,
            Err(reason) => {
                tracing::warn!(error = %reason, "discarding malformed event");
                return Disposition::Discarded;
            }
        };

        let event_id = event.resolve_id(delivery, Utc::now(), self.config.bucket_secs);
        if self.recent.contains(&event_id, Instant::now()) {
            tracing::debug!(event_id = %event_id, "skipping duplicate event");
            return Disposition::Duplicate;
        }

        match self
            .serializer
            .submit(event.into_request(event_id.clone()))
            .await
        {
            Ok(record) => {
                tracing::info!(
                    event_id = %event_id,
                    item_id = %record.item_id,
                    quantity = record.quantity,
                    "order event applied"
                );
                self.recent.record(event_id, Instant::now());
                Disposition::Applied(record)
            }
            Err(err) if err.is_retryable() => {
                tracing::warn!(event_id = %event_id, error = %err, "ledger unavailable, deferring event");
                Disposition::Deferred
            }
            Err(err) => {
                tracing::warn!(event_id = %event_id, error = %err, "discarding event rejected by the ledger");
                Disposition::Discarded
            }
        }
    }

    /// Fetches one batch and settles each delivery in order.
    ///
    /// On the first deferred delivery it and the rest of the batch are
    /// released, so per-item order is kept on redelivery.
    pub async fn poll_once(&mut self) -> Result<PollOutcome> {
        let batch = self.source.fetch(self.config.batch_size).await?;
        let fetched = batch.len();

        let mut deliveries = batch.into_iter();
        while let Some(delivery) = deliveries.next() {
            let disposition = self.process(&delivery).await;
            metrics::counter!("intake_events_total", "outcome" => disposition.label())
                .increment(1);

            if disposition == Disposition::Deferred {
                self.source.release(&delivery).await?;
                for rest in deliveries {
                    self.source.release(&rest).await?;
                }
                return Ok(PollOutcome::Deferred);
            }
            self.source.ack(&delivery).await?;
        }

        Ok(PollOutcome::Processed(fetched))
    }

    /// Polls until `shutdown` turns true or its sender is dropped.
    ///
    /// Shutdown is only observed between polls, so a delivery is never left
    /// applied but unacknowledged by a stop request.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("event intake started");
        let mut backoff = self.config.backoff;

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.poll_once().await {
                Ok(PollOutcome::Processed(_)) => {
                    backoff = self.config.backoff;
                    continue;
                }
                Ok(PollOutcome::Deferred) => {
                    tracing::warn!(delay = ?backoff, "ledger unavailable, backing off");
                }
                Err(err) => {
                    tracing::error!(error = %err, delay = ?backoff, "event bus error, backing off");
                }
            }

            let stopped = tokio::select! {
                changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
                _ = tokio::time::sleep(backoff) => false,
            };
            if stopped {
                break;
            }
            backoff = (backoff * 2).min(self.config.max_backoff);
        }

        tracing::info!("event intake stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::InMemoryEventSource;
    use common::ItemId;
    use ledger_store::{InMemoryLedgerStore, LedgerStoreExt};

    fn intake(
        store: &InMemoryLedgerStore,
        source: &InMemoryEventSource,
    ) -> EventIntake<InMemoryLedgerStore, InMemoryEventSource> {
        EventIntake::new(
            MutationSerializer::new(store.clone()),
            source.clone(),
            IntakeConfig::default(),
        )
    }

    async fn quantity(store: &InMemoryLedgerStore, id: &str) -> Option<i64> {
        store.quantity(&ItemId::parse(id).unwrap()).await.unwrap()
    }

    #[tokio::test]
    async fn applies_event_as_decrement_of_unseen_item() {
        let store = InMemoryLedgerStore::new();
        let source = InMemoryEventSource::new();
        let mut intake = intake(&store, &source);

        source.publish(r#"{"itemId": "A", "quantity": 3}"#);
        let outcome = intake.poll_once().await.unwrap();

        assert_eq!(outcome, PollOutcome::Processed(1));
        assert_eq!(quantity(&store, "A").await, Some(-3));
        assert_eq!(source.acked().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_event_id_decrements_once() {
        let store = InMemoryLedgerStore::new();
        let source = InMemoryEventSource::new();
        let mut intake = intake(&store, &source);

        source.publish(r#"{"itemId": "A", "quantity": 2, "eventId": "order-1"}"#);
        source.publish(r#"{"itemId": "A", "quantity": 2, "eventId": "order-1"}"#);
        intake.poll_once().await.unwrap();

        assert_eq!(quantity(&store, "A").await, Some(-2));
        assert_eq!(source.acked().len(), 2);
    }

    #[tokio::test]
    async fn malformed_event_is_acked_and_ledger_untouched() {
        let store = InMemoryLedgerStore::new();
        let source = InMemoryEventSource::new();
        let mut intake = intake(&store, &source);

        let bad = source.publish(r#"{"quantity": 1}"#);
        source.publish(r#"{"itemId": "B", "quantity": 1}"#);
        let outcome = intake.poll_once().await.unwrap();

        assert_eq!(outcome, PollOutcome::Processed(2));
        assert!(source.acked().contains(&bad));
        assert_eq!(quantity(&store, "A").await, None);
        assert_eq!(quantity(&store, "B").await, Some(-1));
    }

    #[tokio::test]
    async fn overflowing_event_is_discarded() {
        let store = InMemoryLedgerStore::new();
        let source = InMemoryEventSource::new();
        let mut intake = intake(&store, &source);
        MutationSerializer::new(store.clone())
            .submit(ledger::MutationRequest::direct(
                ItemId::parse("A").unwrap(),
                ledger::MutationKind::Set(i64::MIN),
            ))
            .await
            .unwrap();

        source.publish(r#"{"itemId": "A", "quantity": 1}"#);
        intake.poll_once().await.unwrap();

        assert_eq!(source.acked().len(), 1);
        assert_eq!(quantity(&store, "A").await, Some(i64::MIN));
    }

    #[tokio::test]
    async fn unavailable_store_defers_then_redelivery_applies_once() {
        let store = InMemoryLedgerStore::new();
        let source = InMemoryEventSource::new();
        let mut intake = intake(&store, &source);

        source.publish(r#"{"itemId": "A", "quantity": 5, "eventId": "order-9"}"#);
        source.publish(r#"{"itemId": "B", "quantity": 1}"#);

        store.set_unavailable(true);
        assert_eq!(intake.poll_once().await.unwrap(), PollOutcome::Deferred);
        assert!(source.acked().is_empty());
        assert_eq!(source.in_flight(), 0);
        assert_eq!(source.ready(), 2);

        store.set_unavailable(false);
        assert_eq!(intake.poll_once().await.unwrap(), PollOutcome::Processed(2));
        assert_eq!(quantity(&store, "A").await, Some(-5));
        assert_eq!(quantity(&store, "B").await, Some(-1));

        // The bus hands the same event out again anyway.
        source.publish(r#"{"itemId": "A", "quantity": 5, "eventId": "order-9"}"#);
        intake.poll_once().await.unwrap();
        assert_eq!(quantity(&store, "A").await, Some(-5));
    }

    #[tokio::test]
    async fn redelivery_after_crash_uses_stable_delivery_id() {
        let store = InMemoryLedgerStore::new();
        let source = InMemoryEventSource::new();
        let mut intake = intake(&store, &source);

        source.publish(r#"{"itemId": "A", "quantity": 1}"#);
        let batch = source.fetch(1).await.unwrap();
        assert_eq!(intake.process(&batch[0]).await.label(), "applied");

        // Applied but never acked.
        source.redeliver_unacked();
        intake.poll_once().await.unwrap();

        assert_eq!(quantity(&store, "A").await, Some(-1));
        assert_eq!(source.acked(), vec![batch[0].receipt.clone()]);
    }

    #[tokio::test]
    async fn bus_failure_is_an_error_not_a_panic() {
        let store = InMemoryLedgerStore::new();
        let source = InMemoryEventSource::new();
        let mut intake = intake(&store, &source);

        source.set_failing(true);
        assert!(intake.poll_once().await.is_err());
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let store = InMemoryLedgerStore::new();
        let source = InMemoryEventSource::new();
        let intake = intake(&store, &source);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        source.publish(r#"{"itemId": "A", "quantity": 2}"#);
        let handle = tokio::spawn(intake.run(shutdown_rx));

        for _ in 0..100 {
            if source.acked().len() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(quantity(&store, "A").await, Some(-2));
    }
}
