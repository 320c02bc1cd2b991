use serde::{Deserialize, Serialize};

use crate::ItemId;

/// Per-item mutation counter.
///
/// A record is created at version 1 by its first write and every accepted
/// mutation increments it by one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(u64);

impl Version {
    /// Creates a new version from a raw value.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the version of an item that has never been written (0).
    pub fn initial() -> Self {
        Self(0)
    }

    /// Returns the version assigned by the first write (1).
    pub fn first() -> Self {
        Self(1)
    }

    /// Returns the next version.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw version value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Postgres stores versions as `BIGINT`; a negative value is a corrupt row.
impl TryFrom<i64> for Version {
    type Error = std::num::TryFromIntError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        u64::try_from(value).map(Self)
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// The stored stock quantity of one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRecord {
    pub item_id: ItemId,
    /// May be negative: an oversold item is a backorder, not a ledger error.
    pub quantity: i64,
    pub version: Version,
}

impl StockRecord {
    /// Creates the record produced by the first write to an item.
    pub fn created(item_id: ItemId, quantity: i64) -> Self {
        Self {
            item_id,
            quantity,
            version: Version::first(),
        }
    }

    /// Returns the record after replacing its quantity.
    pub fn updated(&self, quantity: i64) -> Self {
        Self {
            item_id: self.item_id.clone(),
            quantity,
            version: self.version.next(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_sequence() {
        assert_eq!(Version::initial().next(), Version::first());
        assert_eq!(Version::first().next().as_u64(), 2);
        assert_eq!(Version::new(7).to_string(), "v7");
    }

    #[test]
    fn stored_version_must_be_non_negative() {
        assert_eq!(Version::try_from(3i64), Ok(Version::new(3)));
        assert!(Version::try_from(-1i64).is_err());
    }

    #[test]
    fn updated_bumps_version_and_keeps_id() {
        let record = StockRecord::created(ItemId::parse("A").unwrap(), 10);
        let next = record.updated(-2);
        assert_eq!(next.item_id, record.item_id);
        assert_eq!(next.quantity, -2);
        assert_eq!(next.version, Version::new(2));
    }
}
