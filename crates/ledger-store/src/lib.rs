//! Durable ledger store: one transactional row per inventory item.
//!
//! - [`LedgerStore`] trait with atomic read-modify-write per item
//! - [`PostgresLedgerStore`] backed by a row-locking transaction
//! - [`InMemoryLedgerStore`] for tests, with a switch to simulate outages

pub mod error;
pub mod memory;
pub mod postgres;
pub mod record;
pub mod retry;
pub mod store;

pub use common::ItemId;
pub use error::{LedgerStoreError, Result};
pub use memory::InMemoryLedgerStore;
pub use postgres::{PostgresConfig, PostgresLedgerStore};
pub use record::{StockRecord, Version};
pub use retry::RetryPolicy;
pub use store::{LedgerStore, LedgerStoreExt, Transform};
