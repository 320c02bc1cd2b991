//! Order-event intake for the stock ledger.
//!
//! - [`EventSource`] abstracts an at-least-once bus with manual ack
//! - [`RedisStreamsSource`] reads a Redis stream through a consumer group
//! - [`RecencySet`] remembers applied event ids for a bounded window
//! - [`EventIntake`] decodes, de-duplicates and applies each delivery,
//!   acknowledging only once it is settled

pub mod dedup;
pub mod error;
pub mod event;
pub mod redis_streams;
pub mod source;
pub mod worker;

pub use dedup::RecencySet;
pub use error::{BusError, IntakeError, MalformedEvent, Result};
pub use event::InventoryEvent;
pub use redis_streams::{RedisStreamsConfig, RedisStreamsSource};
pub use source::{Delivery, EventSource, InMemoryEventSource};
pub use worker::{Disposition, EventIntake, IntakeConfig, PollOutcome};
