//! Identifier types shared by every ledger crate.

pub mod types;

pub use types::{EventId, InvalidIdentifier, ItemId, MAX_ITEM_ID_LEN};
