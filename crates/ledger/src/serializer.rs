//! Per-item mutation serializer.
//!
//! Every item with pending work owns a FIFO queue and a drain task. Requests
//! for the same item run one at a time in arrival order, whichever source
//! submitted them; requests for different items never wait on each other.
//! The drain task, not the submitter, owns an admitted mutation, so a caller
//! that goes away cannot abort it halfway.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use common::ItemId;
use ledger_store::{LedgerStore, StockRecord};
use tokio::sync::{mpsc, oneshot};

use crate::error::{LedgerError, Result};
use crate::mutation::MutationRequest;

struct Job {
    request: MutationRequest,
    reply: oneshot::Sender<Result<StockRecord>>,
}

type Queues = Arc<Mutex<HashMap<ItemId, mpsc::UnboundedSender<Job>>>>;

/// Applies mutation requests to a [`LedgerStore`] one at a time per item.
///
/// Cloning is cheap and clones share the same queues, so the gateway and the
/// event intake must be handed clones of one serializer.
#[derive(Clone)]
pub struct MutationSerializer<S: LedgerStore> {
    store: S,
    queues: Queues,
}

impl<S> MutationSerializer<S>
where
    S: LedgerStore + Clone + 'static,
{
    /// Creates a serializer in front of the given store.
    pub fn new(store: S) -> Self {
        Self {
            store,
            queues: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Returns the number of items that currently have queued or running work.
    pub fn active_items(&self) -> usize {
        lock(&self.queues).len()
    }

    /// Admits a request and returns a future resolving to the new record.
    ///
    /// The request's place in its item's queue is fixed by this call, before
    /// the returned future is polled. Dropping the future does not cancel the
    /// mutation.
    pub fn submit(
        &self,
        request: MutationRequest,
    ) -> impl Future<Output = Result<StockRecord>> + Send + use<S> {
        let item_id = request.item_id.clone();
        let (reply, response) = oneshot::channel();
        self.enqueue(Job { request, reply });

        async move {
            response
                .await
                .unwrap_or_else(|_| Err(LedgerError::WorkerStopped(item_id)))
        }
    }

    fn enqueue(&self, job: Job) {
        let item_id = job.request.item_id.clone();
        let mut queues = lock(&self.queues);

        let job = match queues.get(&item_id) {
            Some(sender) => match sender.send(job) {
                Ok(()) => return,
                // The drain task died without deregistering; replace it.
                Err(mpsc::error::SendError(job)) => job,
            },
            None => job,
        };

        let (sender, receiver) = mpsc::unbounded_channel();
        // Cannot fail while `receiver` is in scope.
        let _ = sender.send(job);
        queues.insert(item_id.clone(), sender);
        metrics::gauge!("ledger_active_items").set(queues.len() as f64);
        drop(queues);

        tokio::spawn(drain(
            self.store.clone(),
            item_id,
            receiver,
            Arc::clone(&self.queues),
        ));
    }
}

/// Runs an item's queued mutations until the queue is empty, then
/// deregisters the queue.
async fn drain<S: LedgerStore>(
    store: S,
    item_id: ItemId,
    mut receiver: mpsc::UnboundedReceiver<Job>,
    queues: Queues,
) {
    loop {
        let job = match receiver.try_recv() {
            Ok(job) => job,
            Err(_) => {
                // Senders only send while holding the map lock, so an empty
                // queue observed under the lock stays empty until we leave.
                let mut registry = lock(&queues);
                match receiver.try_recv() {
                    Ok(job) => job,
                    Err(_) => {
                        registry.remove(&item_id);
                        metrics::gauge!("ledger_active_items").set(registry.len() as f64);
                        return;
                    }
                }
            }
        };

        let result = execute(&store, &job.request).await;
        // The submitter may be gone; the mutation stands either way.
        let _ = job.reply.send(result);
    }
}

#[tracing::instrument(
    skip(store, request),
    fields(item_id = %request.item_id, kind = request.kind.label(), origin = %request.origin)
)]
async fn execute<S: LedgerStore>(store: &S, request: &MutationRequest) -> Result<StockRecord> {
    let kind = request.kind;
    let started = Instant::now();

    let result = store
        .apply_atomic(&request.item_id, &move |current| kind.apply(current))
        .await;

    metrics::histogram!("ledger_mutation_duration_seconds")
        .record(started.elapsed().as_secs_f64());

    match result {
        Ok(record) => {
            metrics::counter!(
                "ledger_mutations_total",
                "kind" => kind.label(),
                "origin" => request.origin.label()
            )
            .increment(1);
            tracing::debug!(quantity = record.quantity, version = %record.version, "mutation applied");
            Ok(record)
        }
        Err(err) => {
            tracing::warn!(error = %err, "mutation failed");
            Err(err.into())
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutation::MutationKind;
    use common::EventId;
    use ledger_store::{InMemoryLedgerStore, LedgerStoreExt};

    fn item(id: &str) -> ItemId {
        ItemId::parse(id).unwrap()
    }

    fn set(id: &str, value: i64) -> MutationRequest {
        MutationRequest::direct(item(id), MutationKind::Set(value))
    }

    fn adjust(id: &str, delta: i64) -> MutationRequest {
        MutationRequest::direct(item(id), MutationKind::Adjust(delta))
    }

    #[tokio::test]
    async fn applies_in_arrival_order() {
        let serializer = MutationSerializer::new(InMemoryLedgerStore::new());

        let first = serializer.submit(set("A", 10));
        let second = serializer.submit(adjust("A", 5));
        let third = serializer.submit(MutationRequest::from_event(
            item("A"),
            3,
            EventId::new("evt-1"),
        ));

        // Await out of order: admission order still decides.
        let third = third.await.unwrap();
        let first = first.await.unwrap();
        let second = second.await.unwrap();

        assert_eq!(first.quantity, 10);
        assert_eq!(second.quantity, 15);
        assert_eq!(third.quantity, 12);
        assert_eq!(third.version.as_u64(), 3);
    }

    #[tokio::test]
    async fn set_after_adjusts_overwrites() {
        let serializer = MutationSerializer::new(InMemoryLedgerStore::new());

        let a = serializer.submit(adjust("A", 5));
        let b = serializer.submit(adjust("A", -3));
        let c = serializer.submit(set("A", 10));
        let (a, b, c) = tokio::join!(a, b, c);

        assert_eq!(a.unwrap().quantity, 5);
        assert_eq!(b.unwrap().quantity, 2);
        assert_eq!(c.unwrap().quantity, 10);
    }

    #[tokio::test]
    async fn dropped_submission_still_applies() {
        let store = InMemoryLedgerStore::new();
        let serializer = MutationSerializer::new(store.clone());

        drop(serializer.submit(adjust("A", 7)));
        let after = serializer.submit(adjust("A", 1)).await.unwrap();

        assert_eq!(after.quantity, 8);
        assert_eq!(store.quantity(&item("A")).await.unwrap(), Some(8));
    }

    #[tokio::test]
    async fn overflow_is_invalid_argument_and_not_applied() {
        let serializer = MutationSerializer::new(InMemoryLedgerStore::new());
        serializer.submit(set("A", i64::MAX)).await.unwrap();

        let result = serializer.submit(adjust("A", 1)).await;
        assert!(matches!(result, Err(LedgerError::InvalidArgument(_))));

        let next = serializer.submit(adjust("A", -1)).await.unwrap();
        assert_eq!(next.quantity, i64::MAX - 1);
    }

    #[tokio::test]
    async fn store_outage_surfaces_as_store_unavailable() {
        let store = InMemoryLedgerStore::new();
        let serializer = MutationSerializer::new(store.clone());
        store.set_unavailable(true);

        let result = serializer.submit(adjust("A", 1)).await;
        assert!(matches!(result, Err(LedgerError::StoreUnavailable(_))));
        assert!(result.unwrap_err().is_retryable());

        store.set_unavailable(false);
        assert_eq!(serializer.submit(adjust("A", 1)).await.unwrap().quantity, 1);
    }

    #[tokio::test]
    async fn idle_queues_are_released() {
        let serializer = MutationSerializer::new(InMemoryLedgerStore::new());

        serializer.submit(set("A", 1)).await.unwrap();
        serializer.submit(set("B", 1)).await.unwrap();

        // The drain task deregisters right after replying.
        for _ in 0..100 {
            if serializer.active_items() == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(serializer.active_items(), 0);

        // A released item accepts new work.
        assert_eq!(serializer.submit(adjust("A", 1)).await.unwrap().quantity, 2);
    }
}
