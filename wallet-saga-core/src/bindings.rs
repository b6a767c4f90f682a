//! Static event-type → broker destination bindings (`spec.md` §4.1 tbl,
//! §6.2). Single source of truth: the publisher fails fast (by skipping the
//! row) if an `eventType` has no binding here, and nothing else in the
//! workspace is allowed to invent a destination string of its own.

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

/// The logical event types this saga core knows how to route and drive
/// transitions for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    WalletCreated,
    FundsAdded,
    FundsWithdrawn,
    FundsTransferred,
}

impl EventType {
    /// The stable wire/string name used as `OutboxRecord.eventType` and
    /// CloudEvents `type`.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::WalletCreated => "walletCreatedEventProducer",
            EventType::FundsAdded => "fundsAddedEventProducer",
            EventType::FundsWithdrawn => "fundsWithdrawnEventProducer",
            EventType::FundsTransferred => "fundsTransferredEventProducer",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "walletCreatedEventProducer" => Some(EventType::WalletCreated),
            "fundsAddedEventProducer" => Some(EventType::FundsAdded),
            "fundsWithdrawnEventProducer" => Some(EventType::FundsWithdrawn),
            "fundsTransferredEventProducer" => Some(EventType::FundsTransferred),
            _ => None,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn bindings_map() -> &'static HashMap<&'static str, &'static str> {
    static MAP: OnceLock<HashMap<&'static str, &'static str>> = OnceLock::new();
    MAP.get_or_init(|| {
        HashMap::from([
            (
                EventType::WalletCreated.as_str(),
                "wallet-created-topic",
            ),
            (EventType::FundsAdded.as_str(), "funds-added-topic"),
            (
                EventType::FundsWithdrawn.as_str(),
                "funds-withdrawn-topic",
            ),
            (
                EventType::FundsTransferred.as_str(),
                "funds-transferred-topic",
            ),
        ])
    })
}

/// Look up the broker destination for a raw `eventType` string, as read
/// from an `OutboxRecord`. `None` means no binding exists — the caller
/// should leave the row unsent and alert, per `spec.md` §4.3 step 2a.
pub fn destination_for(event_type: &str) -> Option<&'static str> {
    bindings_map().get(event_type).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_spec_table_bit_exactly() {
        assert_eq!(
            destination_for("walletCreatedEventProducer"),
            Some("wallet-created-topic")
        );
        assert_eq!(
            destination_for("fundsAddedEventProducer"),
            Some("funds-added-topic")
        );
        assert_eq!(
            destination_for("fundsWithdrawnEventProducer"),
            Some("funds-withdrawn-topic")
        );
        assert_eq!(
            destination_for("fundsTransferredEventProducer"),
            Some("funds-transferred-topic")
        );
    }

    #[test]
    fn unknown_event_type_has_no_binding() {
        assert_eq!(destination_for("sagaCompletedEventProducer"), None);
    }

    #[test]
    fn event_type_round_trips_through_its_string_form() {
        for et in [
            EventType::WalletCreated,
            EventType::FundsAdded,
            EventType::FundsWithdrawn,
            EventType::FundsTransferred,
        ] {
            assert_eq!(EventType::from_str(et.as_str()), Some(et));
        }
    }
}
