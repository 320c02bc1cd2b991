//! Order-created event decoding and event id resolution.

use chrono::{DateTime, Utc};
use common::{EventId, ItemId};
use ledger::MutationRequest;
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::MalformedEvent;
use crate::source::Delivery;

/// Default width of the arrival bucket used for derived event ids.
pub const DEFAULT_BUCKET_SECS: i64 = 60;

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(default, alias = "itemId")]
    item_id: Option<String>,
    #[serde(default)]
    quantity: Option<Value>,
    #[serde(default, alias = "eventId")]
    event_id: Option<String>,
}

/// A decoded order-created event: `quantity` units of `item_id` were ordered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryEvent {
    pub item_id: ItemId,
    pub quantity: i64,
    pub event_id: Option<EventId>,
}

impl InventoryEvent {
    /// Decodes a bus payload. Accepts `itemId`/`item_id` and `eventId`/`event_id`.
    pub fn decode(payload: &[u8]) -> Result<Self, MalformedEvent> {
        let raw: RawEvent = serde_json::from_slice(payload)
            .map_err(|e| MalformedEvent::NotJson(e.to_string()))?;

        let item_id = ItemId::parse(raw.item_id.ok_or(MalformedEvent::MissingItemId)?)?;

        let quantity = raw.quantity.ok_or(MalformedEvent::MissingQuantity)?;
        let quantity = quantity
            .as_i64()
            .ok_or_else(|| MalformedEvent::InvalidQuantity(quantity.to_string()))?;
        if quantity <= 0 {
            return Err(MalformedEvent::NonPositiveQuantity(quantity));
        }

        let event_id = raw
            .event_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .map(EventId::new);

        Ok(Self {
            item_id,
            quantity,
            event_id,
        })
    }

    /// Resolves the id used for de-duplication.
    ///
    /// Order of preference: the id carried in the payload, the bus's stable
    /// delivery id, then a digest of the event's content and arrival bucket.
    pub fn resolve_id(&self, delivery: &Delivery, arrived: DateTime<Utc>, bucket_secs: i64) -> EventId {
        if let Some(event_id) = &self.event_id {
            return event_id.clone();
        }
        if let Some(stable_id) = &delivery.stable_id {
            return EventId::new(format!("delivery:{stable_id}"));
        }
        self.derived_id(arrived, bucket_secs)
    }

    fn derived_id(&self, arrived: DateTime<Utc>, bucket_secs: i64) -> EventId {
        let bucket = arrived.timestamp().div_euclid(bucket_secs.max(1));

        let mut hasher = Sha256::new();
        hasher.update(self.item_id.as_str().as_bytes());
        hasher.update(b"|");
        hasher.update(self.quantity.to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(bucket.to_string().as_bytes());

        EventId::new(format!("derived:{}", hex::encode(hasher.finalize())))
    }

    /// The decrement this event asks for.
    pub fn into_request(self, event_id: EventId) -> MutationRequest {
        MutationRequest::from_event(self.item_id, self.quantity, event_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ledger::MutationKind;

    fn delivery(stable_id: Option<&str>) -> Delivery {
        Delivery {
            receipt: "r-1".to_string(),
            stable_id: stable_id.map(str::to_string),
            payload: Vec::new(),
            redelivered: false,
        }
    }

    #[test]
    fn decodes_camel_and_snake_case() {
        let camel = InventoryEvent::decode(br#"{"itemId": "A", "quantity": 3, "eventId": "e-1"}"#)
            .unwrap();
        let snake =
            InventoryEvent::decode(br#"{"item_id": "A", "quantity": 3, "event_id": "e-1"}"#)
                .unwrap();

        assert_eq!(camel, snake);
        assert_eq!(camel.item_id.as_str(), "A");
        assert_eq!(camel.quantity, 3);
        assert_eq!(camel.event_id, Some(EventId::new("e-1")));
    }

    #[test]
    fn ignores_unknown_fields() {
        let event =
            InventoryEvent::decode(br#"{"orderId": 9, "itemId": "A", "quantity": 1}"#).unwrap();
        assert_eq!(event.event_id, None);
    }

    #[test]
    fn rejects_malformed_payloads() {
        assert!(matches!(
            InventoryEvent::decode(b"not json"),
            Err(MalformedEvent::NotJson(_))
        ));
        assert!(matches!(
            InventoryEvent::decode(br#"{"quantity": 1}"#),
            Err(MalformedEvent::MissingItemId)
        ));
        assert!(matches!(
            InventoryEvent::decode(br#"{"itemId": "  ", "quantity": 1}"#),
            Err(MalformedEvent::InvalidItemId(_))
        ));
        assert!(matches!(
            InventoryEvent::decode(br#"{"itemId": " A", "quantity": 1}"#),
            Err(MalformedEvent::InvalidItemId(_))
        ));
        assert!(matches!(
            InventoryEvent::decode(br#"{"itemId": "A"}"#),
            Err(MalformedEvent::MissingQuantity)
        ));
        assert!(matches!(
            InventoryEvent::decode(br#"{"itemId": "A", "quantity": "2"}"#),
            Err(MalformedEvent::InvalidQuantity(_))
        ));
        assert!(matches!(
            InventoryEvent::decode(br#"{"itemId": "A", "quantity": 0}"#),
            Err(MalformedEvent::NonPositiveQuantity(0))
        ));
    }

    #[test]
    fn payload_id_wins_over_delivery_id() {
        let event =
            InventoryEvent::decode(br#"{"itemId": "A", "quantity": 1, "eventId": "e-7"}"#)
                .unwrap();
        let id = event.resolve_id(&delivery(Some("1-0")), Utc::now(), DEFAULT_BUCKET_SECS);
        assert_eq!(id.as_str(), "e-7");
    }

    #[test]
    fn falls_back_to_delivery_id() {
        let event = InventoryEvent::decode(br#"{"itemId": "A", "quantity": 1}"#).unwrap();
        let id = event.resolve_id(&delivery(Some("1-0")), Utc::now(), DEFAULT_BUCKET_SECS);
        assert_eq!(id.as_str(), "delivery:1-0");
    }

    #[test]
    fn derived_id_is_stable_within_bucket() {
        let event = InventoryEvent::decode(br#"{"itemId": "A", "quantity": 2}"#).unwrap();
        let early = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 5).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 55).unwrap();
        let next = Utc.with_ymd_and_hms(2024, 1, 1, 12, 1, 5).unwrap();

        let a = event.resolve_id(&delivery(None), early, 60);
        let b = event.resolve_id(&delivery(None), late, 60);
        let c = event.resolve_id(&delivery(None), next, 60);

        let digest = a.as_str().strip_prefix("derived:").unwrap();
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn request_decrements_by_quantity() {
        let event = InventoryEvent::decode(br#"{"itemId": "A", "quantity": 4}"#).unwrap();
        let request = event.into_request(EventId::new("e-1"));
        assert_eq!(request.kind, MutationKind::Adjust(-4));
    }
}
