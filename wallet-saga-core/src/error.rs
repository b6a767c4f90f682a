use thiserror::Error;
use uuid::Uuid;

/// CloudEvents envelope encode/decode failures (`spec.md` §4.1).
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("malformed envelope: {0}")]
    Malformed(String),
}

/// Outbox store and publisher failures (`spec.md` §4.2/§4.3).
#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("no binding for event type {0:?}")]
    MissingBinding(String),

    #[error("broker publish failed: {0}")]
    BrokerPublish(String),

    #[error("envelope error: {0}")]
    Envelope(#[from] EnvelopeError),

    #[error("outbox row {0} not found")]
    RecordNotFound(Uuid),
}

/// Saga state machine failures (`spec.md` §4.4).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SagaError {
    #[error("invalid transition from {from:?} on event {event:?}")]
    InvalidTransition { from: String, event: String },

    #[error("missing correlation id")]
    MissingCorrelationId,

    #[error("unknown saga {0}")]
    UnknownSaga(Uuid),

    #[error("concurrent transition on saga {0}, retries exhausted")]
    ConcurrentTransition(Uuid),
}

/// Failures surfaced from persisting/loading a `SagaSnapshot`.
#[derive(Debug, Error)]
pub enum SnapshotStoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Saga(#[from] SagaError),
}

/// Idempotency ledger failures (`spec.md` §4.6).
#[derive(Debug, Error)]
pub enum IdempotencyError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Consumer dispatcher failures (`spec.md` §4.5).
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error(transparent)]
    Idempotency(#[from] IdempotencyError),

    #[error("handler error (recoverable): {0}")]
    Recoverable(String),

    #[error("handler error (non-recoverable): {0}")]
    NonRecoverable(String),

    #[error(transparent)]
    Saga(#[from] SnapshotStoreError),
}
