//! Mutation requests and the validated parse of raw caller input.

use common::{EventId, ItemId};
use serde_json::Value;

use crate::error::{LedgerError, Result};

/// What a mutation does to an item's quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    /// Replace the quantity (last writer wins).
    Set(i64),
    /// Add a signed delta; an unseen item counts as 0.
    Adjust(i64),
}

impl MutationKind {
    /// Computes the new quantity, or `None` if it would overflow.
    ///
    /// Negative results are allowed: overselling is a backorder signal for
    /// the business layer, not a ledger error.
    pub fn apply(&self, current: Option<i64>) -> Option<i64> {
        match *self {
            MutationKind::Set(value) => Some(value),
            MutationKind::Adjust(delta) => current.unwrap_or(0).checked_add(delta),
        }
    }

    /// Short label used in logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            MutationKind::Set(_) => "set",
            MutationKind::Adjust(_) => "adjust",
        }
    }
}

/// Where a mutation came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOrigin {
    /// A synchronous caller of the gateway.
    Direct,
    /// An order-created event from the bus.
    EventDriven(EventId),
}

impl MutationOrigin {
    /// Short label used in logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            MutationOrigin::Direct => "direct",
            MutationOrigin::EventDriven(_) => "event",
        }
    }
}

impl std::fmt::Display for MutationOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MutationOrigin::Direct => write!(f, "direct"),
            MutationOrigin::EventDriven(event_id) => write!(f, "event:{event_id}"),
        }
    }
}

/// A single-item mutation, regardless of which source produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRequest {
    pub item_id: ItemId,
    pub kind: MutationKind,
    pub origin: MutationOrigin,
}

impl MutationRequest {
    /// A mutation submitted by a synchronous caller.
    pub fn direct(item_id: ItemId, kind: MutationKind) -> Self {
        Self {
            item_id,
            kind,
            origin: MutationOrigin::Direct,
        }
    }

    /// The decrement produced by an order-created event.
    pub fn from_event(item_id: ItemId, quantity: i64, event_id: EventId) -> Self {
        Self {
            item_id,
            kind: MutationKind::Adjust(quantity.saturating_neg()),
            origin: MutationOrigin::EventDriven(event_id),
        }
    }
}

/// Parses a set-quantity body: a JSON object with an integer `quantity`
/// (the legacy field name `stock` is also accepted).
pub fn parse_set_payload(body: &[u8]) -> Result<MutationKind> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| LedgerError::InvalidArgument(format!("body is not valid JSON: {e}")))?;

    let object = value
        .as_object()
        .ok_or_else(|| LedgerError::InvalidArgument("body must be a JSON object".to_string()))?;

    let field = object
        .get("quantity")
        .or_else(|| object.get("stock"))
        .ok_or_else(|| LedgerError::InvalidArgument("quantity is required".to_string()))?;

    field.as_i64().map(MutationKind::Set).ok_or_else(|| {
        LedgerError::InvalidArgument(format!("quantity must be a 64-bit integer, got {field}"))
    })
}

/// Parses a relative-adjust delta from its raw query-string form.
pub fn parse_delta(raw: Option<&str>) -> Result<MutationKind> {
    let raw = raw
        .map(str::trim)
        .filter(|raw| !raw.is_empty())
        .ok_or_else(|| LedgerError::InvalidArgument("delta is required".to_string()))?;

    raw.parse::<i64>().map(MutationKind::Adjust).map_err(|_| {
        LedgerError::InvalidArgument(format!("delta must be a 64-bit integer, got {raw:?}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_ignores_current_quantity() {
        assert_eq!(MutationKind::Set(10).apply(Some(-3)), Some(10));
        assert_eq!(MutationKind::Set(10).apply(None), Some(10));
    }

    #[test]
    fn adjust_treats_unseen_as_zero_and_may_go_negative() {
        assert_eq!(MutationKind::Adjust(-4).apply(None), Some(-4));
        assert_eq!(MutationKind::Adjust(-4).apply(Some(1)), Some(-3));
    }

    #[test]
    fn adjust_overflow_is_rejected() {
        assert_eq!(MutationKind::Adjust(1).apply(Some(i64::MAX)), None);
        assert_eq!(MutationKind::Adjust(-1).apply(Some(i64::MIN)), None);
    }

    #[test]
    fn event_request_negates_quantity() {
        let request = MutationRequest::from_event(
            ItemId::parse("A").unwrap(),
            3,
            EventId::new("evt-1"),
        );
        assert_eq!(request.kind, MutationKind::Adjust(-3));
        assert_eq!(request.origin.to_string(), "event:evt-1");
    }

    #[test]
    fn parse_set_payload_accepts_integer_quantity() {
        assert_eq!(
            parse_set_payload(br#"{"quantity": 10}"#).unwrap(),
            MutationKind::Set(10)
        );
        assert_eq!(
            parse_set_payload(br#"{"quantity": -2}"#).unwrap(),
            MutationKind::Set(-2)
        );
    }

    #[test]
    fn parse_set_payload_accepts_legacy_stock_field() {
        assert_eq!(
            parse_set_payload(br#"{"stock": 7}"#).unwrap(),
            MutationKind::Set(7)
        );
    }

    #[test]
    fn parse_set_payload_rejects_malformed_bodies() {
        let bodies: [&[u8]; 8] = [
            br#"{}"#,
            br#"{"quantity": "10"}"#,
            br#"{"quantity": 10.5}"#,
            br#"{"quantity": null}"#,
            br#"{"quantity": 99999999999999999999}"#,
            br#"[10]"#,
            b"not json",
            b"",
        ];
        for body in bodies {
            assert!(
                matches!(parse_set_payload(body), Err(LedgerError::InvalidArgument(_))),
                "accepted {:?}",
                String::from_utf8_lossy(body)
            );
        }
    }

    #[test]
    fn parse_delta_accepts_signed_integers() {
        assert_eq!(parse_delta(Some("-3")).unwrap(), MutationKind::Adjust(-3));
        assert_eq!(parse_delta(Some("+5")).unwrap(), MutationKind::Adjust(5));
        assert_eq!(parse_delta(Some(" 2 ")).unwrap(), MutationKind::Adjust(2));
    }

    #[test]
    fn parse_delta_rejects_missing_or_non_integer() {
        for raw in [None, Some(""), Some("abc"), Some("1.5"), Some("1e3")] {
            assert!(matches!(
                parse_delta(raw),
                Err(LedgerError::InvalidArgument(_))
            ));
        }
    }
}
