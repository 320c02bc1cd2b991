//! Event source abstraction and an in-process implementation.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::error::BusError;

/// One message handed out by an [`EventSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Handle the source needs to ack or release this delivery.
    pub receipt: String,
    /// Id that stays the same across redeliveries, if the bus has one.
    pub stable_id: Option<String>,
    /// Raw event payload.
    pub payload: Vec<u8>,
    /// Whether this message was handed out before without an ack.
    pub redelivered: bool,
}

/// An at-least-once message feed with manual acknowledgement.
///
/// A delivery that is neither acked nor released stays owned by the consumer;
/// sources redeliver it after a restart.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Fetches up to `max` deliveries, waiting briefly if none are ready.
    async fn fetch(&self, max: usize) -> Result<Vec<Delivery>, BusError>;

    /// Confirms a delivery; it will not be handed out again.
    async fn ack(&self, delivery: &Delivery) -> Result<(), BusError>;

    /// Returns a delivery to the source for a later redelivery.
    async fn release(&self, delivery: &Delivery) -> Result<(), BusError>;
}

#[derive(Debug, Default)]
struct Queue {
    ready: VecDeque<Delivery>,
    unacked: BTreeMap<String, Delivery>,
    acked: Vec<String>,
}

/// In-process event source with redelivery on release.
///
/// Also used to drive the intake in tests: it records acks and can be
/// switched to fail every bus call.
#[derive(Debug, Clone)]
pub struct InMemoryEventSource {
    queue: Arc<Mutex<Queue>>,
    notify: Arc<Notify>,
    next_receipt: Arc<AtomicU64>,
    stable_ids: bool,
    failing: Arc<AtomicBool>,
    wait: Duration,
}

impl Default for InMemoryEventSource {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEventSource {
    pub fn new() -> Self {
        Self {
            queue: Arc::new(Mutex::new(Queue::default())),
            notify: Arc::new(Notify::new()),
            next_receipt: Arc::new(AtomicU64::new(1)),
            stable_ids: true,
            failing: Arc::new(AtomicBool::new(false)),
            wait: Duration::from_millis(50),
        }
    }

    /// Hands out deliveries without a stable id, like a plain work queue.
    pub fn without_stable_ids(mut self) -> Self {
        self.stable_ids = false;
        self
    }

    /// Makes every subsequent bus call fail until switched back.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Appends a payload and returns its receipt.
    pub fn publish(&self, payload: impl Into<Vec<u8>>) -> String {
        let receipt = self.next_receipt.fetch_add(1, Ordering::SeqCst).to_string();
        let delivery = Delivery {
            receipt: receipt.clone(),
            stable_id: self.stable_ids.then(|| receipt.clone()),
            payload: payload.into(),
            redelivered: false,
        };
        self.lock().ready.push_back(delivery);
        self.notify.notify_one();
        receipt
    }

    /// Receipts acked so far, in ack order.
    pub fn acked(&self) -> Vec<String> {
        self.lock().acked.clone()
    }

    /// Number of deliveries handed out and not yet acked or released.
    pub fn in_flight(&self) -> usize {
        self.lock().unacked.len()
    }

    /// Number of deliveries waiting to be fetched.
    pub fn ready(&self) -> usize {
        self.lock().ready.len()
    }

    /// Simulates a consumer crash: every unacked delivery is redelivered.
    pub fn redeliver_unacked(&self) {
        let mut queue = self.lock();
        let unacked = std::mem::take(&mut queue.unacked);
        for (_, mut delivery) in unacked {
            delivery.redelivered = true;
            queue.ready.push_back(delivery);
        }
        drop(queue);
        self.notify.notify_one();
    }

    fn check(&self) -> Result<(), BusError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take(&self, max: usize) -> Vec<Delivery> {
        let mut queue = self.lock();
        let count = max.min(queue.ready.len());
        let batch: Vec<Delivery> = queue.ready.drain(..count).collect();
        for delivery in &batch {
            queue
                .unacked
                .insert(delivery.receipt.clone(), delivery.clone());
        }
        batch
    }
}

#[async_trait]
impl EventSource for InMemoryEventSource {
    async fn fetch(&self, max: usize) -> Result<Vec<Delivery>, BusError> {
        self.check()?;

        let batch = self.take(max);
        if !batch.is_empty() {
            return Ok(batch);
        }

        let _ = tokio::time::timeout(self.wait, self.notify.notified()).await;
        Ok(self.take(max))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), BusError> {
        self.check()?;

        let mut queue = self.lock();
        if queue.unacked.remove(&delivery.receipt).is_some() {
            queue.acked.push(delivery.receipt.clone());
        }
        Ok(())
    }

    async fn release(&self, delivery: &Delivery) -> Result<(), BusError> {
        self.check()?;

        let mut queue = self.lock();
        if let Some(mut released) = queue.unacked.remove(&delivery.receipt) {
            released.redelivered = true;
            queue.ready.push_back(released);
        }
        drop(queue);
        self.notify.notify_one();
        Ok(())
    }
}
