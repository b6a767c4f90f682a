//! Reliable event distribution and saga orchestration for the wallet
//! backend: a transactional outbox, a CloudEvents envelope codec with
//! W3C trace-context propagation, a saga state machine, and the consumer
//! dispatcher that ties incoming events back to saga transitions.
//!
//! `wallet-service` writes business state and outbox rows in one
//! transaction and runs the publisher; `history-service` runs dispatchers
//! against the broker destinations and feeds the saga-transition handler.

pub mod bindings;
pub mod broker;
pub mod clock;
pub mod config;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod handlers;
pub mod idempotency;
pub mod outbox;
pub mod saga;
pub mod tracing_facade;

pub use bindings::{destination_for, EventType};
pub use broker::{BrokerConsumer, BrokerPublishError, BrokerPublisher, Delivery};
pub use clock::{Clock, SystemClock};
pub use config::Config;
pub use dispatcher::{ConsumerDispatcher, EventHandler, HandlerError};
pub use envelope::{decode, encode, EncodeParams, Envelope};
pub use handlers::SagaTransitionHandler;
pub use idempotency::{run_ledger_sweeper, IdempotencyLedger, PgIdempotencyLedger};
pub use outbox::{OutboxPublisher, OutboxRecord, OutboxStore, PgOutboxStore};
pub use saga::{PgSnapshotStore, SagaEvent, SagaSnapshot, SagaState, SnapshotStore};
