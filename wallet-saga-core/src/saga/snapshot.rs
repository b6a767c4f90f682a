use super::{apply, SagaEvent, SagaState};
use crate::error::{SagaError, SnapshotStoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

/// One row per saga instance (`spec.md` §3.1, §6.3).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SagaSnapshot {
    pub saga_id: Uuid,
    state: String,
    pub version: i32,
    pub last_event_id: Option<Uuid>,
    pub last_transition_at: DateTime<Utc>,
}

impl SagaSnapshot {
    pub fn state(&self) -> SagaState {
        SagaState::from_str(&self.state).expect("saga_snapshot.state is a closed enum in SQL")
    }

    /// Builds a row directly, bypassing a store — used by fakes in other
    /// modules' tests that need to assemble a [`SagaSnapshot`] without a
    /// database round-trip.
    #[cfg(test)]
    pub(crate) fn for_test(
        saga_id: Uuid,
        state: SagaState,
        version: i32,
        last_event_id: Option<Uuid>,
        last_transition_at: DateTime<Utc>,
    ) -> Self {
        Self {
            saga_id,
            state: state.as_str().to_string(),
            version,
            last_event_id,
            last_transition_at,
        }
    }
}

/// Loads/persists [`SagaSnapshot`] rows, guarding transitions with
/// optimistic concurrency (`spec.md` §4.4).
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn load(&self, saga_id: Uuid) -> Result<Option<SagaSnapshot>, SnapshotStoreError>;

    /// Creates the row at `INITIAL`, version 0. Errors if one already
    /// exists for `saga_id`.
    async fn create_initial(&self, saga_id: Uuid) -> Result<SagaSnapshot, SnapshotStoreError>;

    /// Compare-and-swap write: succeeds only if the row's current version
    /// still equals `expected_version`. Returns `Ok(false)` (not an error)
    /// on a version mismatch, so the caller can retry.
    async fn try_transition(
        &self,
        saga_id: Uuid,
        expected_version: i32,
        new_state: SagaState,
        last_event_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, SnapshotStoreError>;
}

/// Drives one saga transition end to end: load, apply, persist with
/// optimistic-concurrency retry, per `spec.md` §4.4.
///
/// - Guard: a missing correlation id never reaches this function — callers
///   resolve that before calling in (see `dispatcher`/`handlers`).
/// - Unknown saga: if no snapshot exists and `event` isn't `WalletCreated`,
///   fails with `ErrUnknownSaga` without creating a row.
/// - Terminal saga: events delivered after `Completed`/`Failed` are
///   accepted as a no-op (caller should still acknowledge the envelope).
pub async fn transition<S: SnapshotStore>(
    store: &S,
    saga_id: Uuid,
    event: SagaEvent,
    event_id: Uuid,
    now: DateTime<Utc>,
    max_retries: u32,
) -> Result<SagaSnapshot, SnapshotStoreError> {
    let mut attempt = 0;
    loop {
        let existing = store.load(saga_id).await?;

        let (current, is_new) = match existing {
            Some(snapshot) => (snapshot, false),
            None if event == SagaEvent::WalletCreated => {
                (store.create_initial(saga_id).await?, true)
            }
            None => return Err(SagaError::UnknownSaga(saga_id).into()),
        };

        if current.state().is_terminal() {
            tracing::warn!(
                saga_id = %saga_id,
                state = %current.state(),
                event = event.as_str(),
                "event delivered to terminal saga, ignoring"
            );
            return Ok(current);
        }

        let next_state = if is_new && event == SagaEvent::WalletCreated {
            apply(SagaState::Initial, event)?
        } else {
            apply(current.state(), event)?
        };

        let applied = store
            .try_transition(saga_id, current.version, next_state, event_id, now)
            .await?;

        if applied {
            return store
                .load(saga_id)
                .await?
                .ok_or_else(|| SagaError::UnknownSaga(saga_id).into());
        }

        attempt += 1;
        if attempt > max_retries {
            return Err(SagaError::ConcurrentTransition(saga_id).into());
        }
        tokio::time::sleep(std::time::Duration::from_millis(20 * attempt as u64)).await;
    }
}

/// `sqlx`/Postgres implementation of [`SnapshotStore`].
#[derive(Clone)]
pub struct PgSnapshotStore {
    pool: PgPool,
}

impl PgSnapshotStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SnapshotStore for PgSnapshotStore {
    async fn load(&self, saga_id: Uuid) -> Result<Option<SagaSnapshot>, SnapshotStoreError> {
        let row = sqlx::query_as::<_, SagaSnapshot>(
            r#"
            SELECT saga_id, state, version, last_event_id, last_transition_at
            FROM saga_snapshot
            WHERE saga_id = $1
            "#,
        )
        .bind(saga_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn create_initial(&self, saga_id: Uuid) -> Result<SagaSnapshot, SnapshotStoreError> {
        let now = Utc::now();
        let row = sqlx::query_as::<_, SagaSnapshot>(
            r#"
            INSERT INTO saga_snapshot (saga_id, state, version, last_event_id, last_transition_at)
            VALUES ($1, $2, 0, NULL, $3)
            RETURNING saga_id, state, version, last_event_id, last_transition_at
            "#,
        )
        .bind(saga_id)
        .bind(SagaState::Initial.as_str())
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    async fn try_transition(
        &self,
        saga_id: Uuid,
        expected_version: i32,
        new_state: SagaState,
        last_event_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, SnapshotStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE saga_snapshot
            SET state = $1, version = version + 1, last_event_id = $2, last_transition_at = $3
            WHERE saga_id = $4 AND version = $5
            "#,
        )
        .bind(new_state.as_str())
        .bind(last_event_id)
        .bind(now)
        .bind(saga_id)
        .bind(expected_version)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FakeSnapshotStore {
        rows: Mutex<HashMap<Uuid, SagaSnapshot>>,
    }

    impl FakeSnapshotStore {
        fn new() -> Self {
            Self {
                rows: Mutex::new(HashMap::new()),
            }
        }
    }

    #[async_trait]
    impl SnapshotStore for FakeSnapshotStore {
        async fn load(&self, saga_id: Uuid) -> Result<Option<SagaSnapshot>, SnapshotStoreError> {
            Ok(self.rows.lock().unwrap().get(&saga_id).cloned())
        }

        async fn create_initial(&self, saga_id: Uuid) -> Result<SagaSnapshot, SnapshotStoreError> {
            let snapshot = SagaSnapshot {
                saga_id,
                state: SagaState::Initial.as_str().to_string(),
                version: 0,
                last_event_id: None,
                last_transition_at: Utc::now(),
            };
            self.rows.lock().unwrap().insert(saga_id, snapshot.clone());
            Ok(snapshot)
        }

        async fn try_transition(
            &self,
            saga_id: Uuid,
            expected_version: i32,
            new_state: SagaState,
            last_event_id: Uuid,
            now: DateTime<Utc>,
        ) -> Result<bool, SnapshotStoreError> {
            let mut rows = self.rows.lock().unwrap();
            let Some(row) = rows.get_mut(&saga_id) else {
                return Ok(false);
            };
            if row.version != expected_version {
                return Ok(false);
            }
            row.state = new_state.as_str().to_string();
            row.version += 1;
            row.last_event_id = Some(last_event_id);
            row.last_transition_at = now;
            Ok(true)
        }
    }

    #[tokio::test]
    async fn first_wallet_created_event_creates_snapshot_at_initial_then_transitions() {
        let store = FakeSnapshotStore::new();
        let saga_id = Uuid::new_v4();
        let snapshot = transition(
            &store,
            saga_id,
            SagaEvent::WalletCreated,
            Uuid::new_v4(),
            Utc::now(),
            3,
        )
        .await
        .unwrap();

        assert_eq!(snapshot.state(), SagaState::WalletCreated);
        assert_eq!(snapshot.version, 1);
    }

    #[tokio::test]
    async fn unknown_saga_on_non_initial_event_fails_without_creating_a_row() {
        let store = FakeSnapshotStore::new();
        let saga_id = Uuid::new_v4();
        let err = transition(
            &store,
            saga_id,
            SagaEvent::FundsWithdrawn,
            Uuid::new_v4(),
            Utc::now(),
            3,
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            SnapshotStoreError::Saga(SagaError::UnknownSaga(_))
        ));
        assert!(store.load(saga_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn full_happy_path_ends_at_completed_version_5() {
        let store = FakeSnapshotStore::new();
        let saga_id = Uuid::new_v4();

        for event in [
            SagaEvent::WalletCreated,
            SagaEvent::FundsAdded,
            SagaEvent::FundsWithdrawn,
            SagaEvent::FundsTransferred,
            SagaEvent::SagaCompleted,
        ] {
            transition(&store, saga_id, event, Uuid::new_v4(), Utc::now(), 3)
                .await
                .unwrap();
        }

        let snapshot = store.load(saga_id).await.unwrap().unwrap();
        assert_eq!(snapshot.state(), SagaState::Completed);
        assert_eq!(snapshot.version, 5);
    }

    #[tokio::test]
    async fn event_after_terminal_state_is_a_no_op() {
        let store = FakeSnapshotStore::new();
        let saga_id = Uuid::new_v4();
        for event in [
            SagaEvent::WalletCreated,
            SagaEvent::FundsAdded,
            SagaEvent::FundsWithdrawn,
            SagaEvent::FundsTransferred,
            SagaEvent::SagaCompleted,
        ] {
            transition(&store, saga_id, event, Uuid::new_v4(), Utc::now(), 3)
                .await
                .unwrap();
        }

        let before = store.load(saga_id).await.unwrap().unwrap();
        let after = transition(
            &store,
            saga_id,
            SagaEvent::FundsAdded,
            Uuid::new_v4(),
            Utc::now(),
            3,
        )
        .await
        .unwrap();

        assert_eq!(after.version, before.version);
        assert_eq!(after.state(), SagaState::Completed);
    }
}
