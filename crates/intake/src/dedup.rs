//! Bounded recency set of applied event ids.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use common::EventId;

/// Remembers recently applied event ids, bounded by both count and age.
///
/// An id is forgotten once it is older than `ttl` or once `capacity` newer
/// ids have been recorded, whichever comes first. A redelivery of a forgotten
/// id is applied again.
#[derive(Debug)]
pub struct RecencySet {
    capacity: usize,
    ttl: Duration,
    seen: HashMap<EventId, Instant>,
    order: VecDeque<(EventId, Instant)>,
}

impl RecencySet {
    /// Creates an empty set. A capacity of zero is treated as one.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl,
            seen: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Returns true if `id` was recorded and has not yet expired at `now`.
    pub fn contains(&self, id: &EventId, now: Instant) -> bool {
        self.seen
            .get(id)
            .is_some_and(|recorded| now.saturating_duration_since(*recorded) < self.ttl)
    }

    /// Records `id` as applied at `now`.
    pub fn record(&mut self, id: EventId, now: Instant) {
        self.evict_expired(now);

        if self.seen.insert(id.clone(), now).is_none() {
            while self.seen.len() > self.capacity {
                self.evict_oldest();
            }
        }
        self.order.push_back((id, now));
    }

    /// Number of ids currently remembered.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    fn evict_expired(&mut self, now: Instant) {
        while let Some((_, recorded)) = self.order.front() {
            if now.saturating_duration_since(*recorded) < self.ttl {
                break;
            }
            self.evict_oldest();
        }
    }

    fn evict_oldest(&mut self) {
        if let Some((id, recorded)) = self.order.pop_front() {
            // Stale entry if the id was recorded again since.
            if self.seen.get(&id) == Some(&recorded) {
                self.seen.remove(&id);
            }
        }
    }
}
