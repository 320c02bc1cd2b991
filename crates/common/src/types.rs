use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum length of an item identifier, in bytes.
pub const MAX_ITEM_ID_LEN: usize = 255;

/// Rejected identifier input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidIdentifier {
    #[error("identifier must not be empty")]
    Empty,

    #[error("identifier exceeds {max} bytes (got {len})")]
    TooLong { len: usize, max: usize },

    #[error("identifier must not start or end with whitespace")]
    SurroundingWhitespace,
}

/// Identifier of an inventory item (the ledger's primary key).
///
/// Always non-empty and free of leading or trailing whitespace. The id is
/// stored exactly as given, so `" A"` is rejected rather than folded into `"A"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ItemId(String);

impl ItemId {
    /// Parses an item id, rejecting empty, padded or oversized input.
    pub fn parse(raw: impl AsRef<str>) -> Result<Self, InvalidIdentifier> {
        let raw = raw.as_ref();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(InvalidIdentifier::Empty);
        }
        if trimmed.len() != raw.len() {
            return Err(InvalidIdentifier::SurroundingWhitespace);
        }
        if raw.len() > MAX_ITEM_ID_LEN {
            return Err(InvalidIdentifier::TooLong {
                len: raw.len(),
                max: MAX_ITEM_ID_LEN,
            });
        }
        Ok(Self(raw.to_string()))
    }

    /// Returns the item id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for ItemId {
    type Error = InvalidIdentifier;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

impl TryFrom<&str> for ItemId {
    type Error = InvalidIdentifier;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

impl From<ItemId> for String {
    fn from(id: ItemId) -> Self {
        id.0
    }
}

impl AsRef<str> for ItemId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Identifier of an order-created event, used for de-duplication.
///
/// Not guaranteed unique by the producer; see the intake's recency window.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    /// Creates an event id from any string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the event id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for EventId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for EventId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_id_rejects_surrounding_whitespace() {
        assert_eq!(
            ItemId::parse("  SKU-001 "),
            Err(InvalidIdentifier::SurroundingWhitespace)
        );
        assert_eq!(
            ItemId::parse(" A"),
            Err(InvalidIdentifier::SurroundingWhitespace)
        );
        assert_eq!(ItemId::parse("SKU 001").unwrap().as_str(), "SKU 001");
    }

    #[test]
    fn item_id_rejects_empty_and_blank() {
        assert_eq!(ItemId::parse(""), Err(InvalidIdentifier::Empty));
        assert_eq!(ItemId::parse("   "), Err(InvalidIdentifier::Empty));
    }

    #[test]
    fn item_id_rejects_oversized() {
        let raw = "x".repeat(MAX_ITEM_ID_LEN + 1);
        assert!(matches!(
            ItemId::parse(&raw),
            Err(InvalidIdentifier::TooLong { .. })
        ));
        assert!(ItemId::parse("x".repeat(MAX_ITEM_ID_LEN)).is_ok());
    }

    #[test]
    fn item_id_deserialization_validates() {
        let id: ItemId = serde_json::from_str("\"A\"").unwrap();
        assert_eq!(id.as_str(), "A");
        assert!(serde_json::from_str::<ItemId>("\"\"").is_err());
    }

    #[test]
    fn event_id_serializes_transparently() {
        let id = EventId::new("evt-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"evt-1\"");
    }
}
