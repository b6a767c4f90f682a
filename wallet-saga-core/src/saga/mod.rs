//! The saga state machine (`spec.md` §4.4): a persisted, event-driven
//! finite-state machine coordinating the wallet-creation → funds-added →
//! funds-withdrawn → transferred → completed workflow.

mod snapshot;

pub use snapshot::{PgSnapshotStore, SagaSnapshot, SnapshotStore};

use crate::error::SagaError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// States of a saga instance (`spec.md` §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SagaState {
    Initial,
    WalletCreated,
    FundsAdded,
    FundsWithdrawn,
    FundsTransferred,
    Completed,
    Failed,
}

impl SagaState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SagaState::Completed | SagaState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SagaState::Initial => "INITIAL",
            SagaState::WalletCreated => "WALLET_CREATED",
            SagaState::FundsAdded => "FUNDS_ADDED",
            SagaState::FundsWithdrawn => "FUNDS_WITHDRAWN",
            SagaState::FundsTransferred => "FUNDS_TRANSFERRED",
            SagaState::Completed => "COMPLETED",
            SagaState::Failed => "FAILED",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        Some(match value {
            "INITIAL" => SagaState::Initial,
            "WALLET_CREATED" => SagaState::WalletCreated,
            "FUNDS_ADDED" => SagaState::FundsAdded,
            "FUNDS_WITHDRAWN" => SagaState::FundsWithdrawn,
            "FUNDS_TRANSFERRED" => SagaState::FundsTransferred,
            "COMPLETED" => SagaState::Completed,
            "FAILED" => SagaState::Failed,
            _ => return None,
        })
    }
}

impl fmt::Display for SagaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events that drive saga transitions (`spec.md` §4.4). Distinct from the
/// outbox `EventType` — these are the saga's own vocabulary, one of which
/// (`SagaCompleted`) never corresponds to an outbox row at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SagaEvent {
    WalletCreated,
    FundsAdded,
    FundsWithdrawn,
    FundsTransferred,
    SagaCompleted,
    SagaFailed,
}

impl SagaEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaEvent::WalletCreated => "WALLET_CREATED",
            SagaEvent::FundsAdded => "FUNDS_ADDED",
            SagaEvent::FundsWithdrawn => "FUNDS_WITHDRAWN",
            SagaEvent::FundsTransferred => "FUNDS_TRANSFERRED",
            SagaEvent::SagaCompleted => "SAGA_COMPLETED",
            SagaEvent::SagaFailed => "SAGA_FAILED",
        }
    }
}

/// Applies the closed transition table of `spec.md` §4.4. Any combination
/// not listed there fails with `InvalidTransition`, leaving the caller's
/// state unchanged — this function never mutates in place, it returns the
/// next state or an error.
pub fn apply(from: SagaState, event: SagaEvent) -> Result<SagaState, SagaError> {
    use SagaEvent::*;
    use SagaState::*;

    // A terminal saga acknowledges and ignores further events rather than
    // erroring — callers distinguish this case themselves (it's not a
    // transition failure) via `SagaState::is_terminal` before calling here.
    match (from, event) {
        (Initial, WalletCreated) => Ok(WalletCreated),
        (WalletCreated, FundsAdded) => Ok(FundsAdded),
        (FundsAdded, FundsWithdrawn) => Ok(FundsWithdrawn),
        (FundsWithdrawn, FundsTransferred) => Ok(FundsTransferred),
        (FundsTransferred, SagaCompleted) => Ok(Completed),
        (Initial, SagaFailed)
        | (WalletCreated, SagaFailed)
        | (FundsAdded, SagaFailed)
        | (FundsWithdrawn, SagaFailed)
        | (FundsTransferred, SagaFailed) => Ok(Failed),
        (from, event) => Err(SagaError::InvalidTransition {
            from: from.as_str().to_string(),
            event: event.as_str().to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_reaches_completed() {
        let mut state = SagaState::Initial;
        for event in [
            SagaEvent::WalletCreated,
            SagaEvent::FundsAdded,
            SagaEvent::FundsWithdrawn,
            SagaEvent::FundsTransferred,
            SagaEvent::SagaCompleted,
        ] {
            state = apply(state, event).unwrap();
        }
        assert_eq!(state, SagaState::Completed);
    }

    #[test]
    fn saga_failed_from_any_non_terminal_state_yields_failed() {
        for state in [
            SagaState::Initial,
            SagaState::WalletCreated,
            SagaState::FundsAdded,
            SagaState::FundsWithdrawn,
            SagaState::FundsTransferred,
        ] {
            assert_eq!(apply(state, SagaEvent::SagaFailed).unwrap(), SagaState::Failed);
        }
    }

    #[test]
    fn out_of_order_event_is_rejected_without_mutating_state() {
        let err = apply(SagaState::Initial, SagaEvent::FundsWithdrawn).unwrap_err();
        match err {
            SagaError::InvalidTransition { from, event } => {
                assert_eq!(from, "INITIAL");
                assert_eq!(event, "FUNDS_WITHDRAWN");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn completed_and_failed_have_no_outgoing_edges() {
        assert!(apply(SagaState::Completed, SagaEvent::SagaFailed).is_err());
        assert!(apply(SagaState::Failed, SagaEvent::SagaFailed).is_err());
        assert!(apply(SagaState::Completed, SagaEvent::WalletCreated).is_err());
    }

    #[test]
    fn state_string_round_trips() {
        for state in [
            SagaState::Initial,
            SagaState::WalletCreated,
            SagaState::FundsAdded,
            SagaState::FundsWithdrawn,
            SagaState::FundsTransferred,
            SagaState::Completed,
            SagaState::Failed,
        ] {
            assert_eq!(SagaState::from_str(state.as_str()), Some(state));
        }
    }
}
