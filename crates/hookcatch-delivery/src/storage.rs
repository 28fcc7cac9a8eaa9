//! Storage boundary for the processing pipeline.
//!
//! [`DeliveryStore`] is everything intake, the state machine and the admin
//! API need from persistence. [`PostgresDeliveryStore`] adapts the core
//! repositories; [`mock::MockDeliveryStore`] keeps everything in memory for
//! tests and local runs.

use std::{future::Future, pin::Pin, sync::Arc};

use chrono::{DateTime, Utc};
use hookcatch_core::{
    error::{CoreError, Result},
    storage::Storage,
    AttemptLease, DeadLetter, DeadLetterRecord, Delivery, DeliveryFilter, DeliveryId,
    DeliveryStatus, NewDeadLetter, NewDelivery, Page, PageRequest,
};

/// Boxed future returned by [`DeliveryStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Result of an idempotent insert.
#[derive(Debug, Clone)]
pub enum InsertOutcome {
    /// Row created in `pending`.
    Created(Delivery),
    /// A delivery with the same `delivery_id` already exists.
    Duplicate,
}

/// Result of trying to start an attempt.
#[derive(Debug, Clone)]
pub enum AttemptClaim {
    /// Now `processing` with `attempts` incremented.
    Claimed(Delivery),
    /// `completed` or `dead`; nothing to do.
    Terminal(DeliveryStatus),
    /// Another attempt holds the row.
    InFlight,
    /// Backoff deadline not reached yet.
    NotDue(Option<DateTime<Utc>>),
    /// Row no longer exists.
    Missing,
}

impl AttemptClaim {
    /// Explains why `delivery` could not be claimed.
    pub fn rejected(delivery: &Delivery) -> Self {
        match delivery.status {
            status if status.is_terminal() => Self::Terminal(status),
            DeliveryStatus::Processing => Self::InFlight,
            _ => Self::NotDue(delivery.next_attempt_at),
        }
    }
}

/// Persistence operations used by intake, processing and the admin API.
///
/// Implementations must make [`DeliveryStore::insert_delivery`] and
/// [`DeliveryStore::begin_attempt`] atomic per row: two concurrent inserts
/// with one `delivery_id` create one row, and two concurrent claims of one
/// delivery let exactly one through. Transitions out of `processing` apply
/// only while the row still carries the claim's [`AttemptLease`]; a lost
/// lease changes nothing.
pub trait DeliveryStore: Send + Sync + 'static {
    /// Creates a pending delivery unless its `delivery_id` is already stored.
    fn insert_delivery(
        &self,
        delivery: NewDelivery,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, InsertOutcome>;

    /// Finds a delivery by primary key.
    fn find_delivery(&self, id: DeliveryId) -> StoreFuture<'_, Option<Delivery>>;

    /// Finds a delivery by provider-assigned identifier.
    fn find_by_delivery_id<'a>(&'a self, delivery_id: &'a str)
        -> StoreFuture<'a, Option<Delivery>>;

    /// Moves a due `pending`/`failed` delivery to `processing`, `attempts + 1`,
    /// under a fresh lease.
    fn begin_attempt(&self, id: DeliveryId, now: DateTime<Utc>) -> StoreFuture<'_, AttemptClaim>;

    /// Marks the leased attempt `completed` and stamps `processed_at`.
    /// Resolves to `false` if the lease was lost.
    fn mark_completed(&self, lease: AttemptLease, now: DateTime<Utc>) -> StoreFuture<'_, bool>;

    /// Marks the leased attempt `failed` with its next attempt deadline.
    /// Resolves to `false` if the lease was lost.
    fn mark_failed(
        &self,
        lease: AttemptLease,
        error_message: String,
        next_attempt_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, bool>;

    /// Marks the leased attempt `dead` and writes its dead letter in one
    /// step. Resolves to `None`, writing nothing, if the lease was lost.
    fn mark_dead(
        &self,
        lease: AttemptLease,
        error_message: String,
        dead_letter: NewDeadLetter,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, Option<DeadLetter>>;

    /// Resets a delivery to `pending`, `attempts = 0`, no error, and
    /// invalidates any outstanding lease.
    fn reset_for_replay(&self, id: DeliveryId, now: DateTime<Utc>) -> StoreFuture<'_, Delivery>;

    /// Deliveries that may have lost their queue entry.
    fn find_due(
        &self,
        now: DateTime<Utc>,
        pending_before: DateTime<Utc>,
        limit: usize,
    ) -> StoreFuture<'_, Vec<DeliveryId>>;

    /// `processing` deliveries not updated since `before`.
    fn find_stale_processing(
        &self,
        before: DateTime<Utc>,
        limit: usize,
    ) -> StoreFuture<'_, Vec<Delivery>>;

    /// Dead letter for a delivery, if it has one.
    fn find_dead_letter(&self, id: DeliveryId) -> StoreFuture<'_, Option<DeadLetter>>;

    /// Deliveries newest first.
    fn list_deliveries(
        &self,
        filter: DeliveryFilter,
        page: PageRequest,
    ) -> StoreFuture<'_, Page<Delivery>>;

    /// Dead letters by most recent failure, with their deliveries.
    fn list_dead_letters(&self, page: PageRequest) -> StoreFuture<'_, Page<DeadLetterRecord>>;

    /// Verifies the backing store is reachable.
    fn health_check(&self) -> StoreFuture<'_, ()>;
}

fn limit_i64(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn missing(id: DeliveryId) -> CoreError {
    CoreError::NotFound(format!("delivery {id}"))
}

/// Postgres-backed store wrapping the core repositories.
pub struct PostgresDeliveryStore {
    storage: Arc<Storage>,
}

impl PostgresDeliveryStore {
    /// Creates a new PostgreSQL storage adapter.
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }
}

impl DeliveryStore for PostgresDeliveryStore {
    fn insert_delivery(
        &self,
        delivery: NewDelivery,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, InsertOutcome> {
        Box::pin(async move {
            let delivery = Delivery::from_new(DeliveryId::new(), delivery, now);
            match self.storage.deliveries.insert(&delivery).await {
                Ok(Some(created)) => Ok(InsertOutcome::Created(created)),
                Ok(None) | Err(CoreError::Duplicate(_)) => Ok(InsertOutcome::Duplicate),
                Err(err) => Err(err),
            }
        })
    }

    fn find_delivery(&self, id: DeliveryId) -> StoreFuture<'_, Option<Delivery>> {
        Box::pin(self.storage.deliveries.find_by_id(id))
    }

    fn find_by_delivery_id<'a>(
        &'a self,
        delivery_id: &'a str,
    ) -> StoreFuture<'a, Option<Delivery>> {
        Box::pin(self.storage.deliveries.find_by_delivery_id(delivery_id))
    }

    fn begin_attempt(&self, id: DeliveryId, now: DateTime<Utc>) -> StoreFuture<'_, AttemptClaim> {
        Box::pin(async move {
            if let Some(claimed) = self.storage.deliveries.begin_attempt(id, now).await? {
                return Ok(AttemptClaim::Claimed(claimed));
            }

            Ok(match self.storage.deliveries.find_by_id(id).await? {
                Some(delivery) => AttemptClaim::rejected(&delivery),
                None => AttemptClaim::Missing,
            })
        })
    }

    fn mark_completed(&self, lease: AttemptLease, now: DateTime<Utc>) -> StoreFuture<'_, bool> {
        Box::pin(self.storage.deliveries.mark_completed(lease, now))
    }

    fn mark_failed(
        &self,
        lease: AttemptLease,
        error_message: String,
        next_attempt_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            self.storage.deliveries.mark_failed(lease, &error_message, next_attempt_at, now).await
        })
    }

    fn mark_dead(
        &self,
        lease: AttemptLease,
        error_message: String,
        dead_letter: NewDeadLetter,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, Option<DeadLetter>> {
        Box::pin(async move {
            self.storage.mark_dead(lease, &error_message, &dead_letter, now).await
        })
    }

    fn reset_for_replay(&self, id: DeliveryId, now: DateTime<Utc>) -> StoreFuture<'_, Delivery> {
        Box::pin(async move {
            self.storage.deliveries.reset_for_replay(id, now).await?.ok_or_else(|| missing(id))
        })
    }

    fn find_due(
        &self,
        now: DateTime<Utc>,
        pending_before: DateTime<Utc>,
        limit: usize,
    ) -> StoreFuture<'_, Vec<DeliveryId>> {
        Box::pin(self.storage.deliveries.find_due(now, pending_before, limit_i64(limit)))
    }

    fn find_stale_processing(
        &self,
        before: DateTime<Utc>,
        limit: usize,
    ) -> StoreFuture<'_, Vec<Delivery>> {
        Box::pin(self.storage.deliveries.find_stale_processing(before, limit_i64(limit)))
    }

    fn find_dead_letter(&self, id: DeliveryId) -> StoreFuture<'_, Option<DeadLetter>> {
        Box::pin(self.storage.dead_letters.find_by_delivery(id))
    }

    fn list_deliveries(
        &self,
        filter: DeliveryFilter,
        page: PageRequest,
    ) -> StoreFuture<'_, Page<Delivery>> {
        Box::pin(async move {
            let (items, total_count) = self.storage.deliveries.list(filter, page).await?;
            Ok(Page { items, current_page: page.page(), total_count })
        })
    }

    fn list_dead_letters(&self, page: PageRequest) -> StoreFuture<'_, Page<DeadLetterRecord>> {
        Box::pin(self.storage.list_dead_letters(page))
    }

    fn health_check(&self) -> StoreFuture<'_, ()> {
        Box::pin(self.storage.health_check())
    }
}

/// In-memory store with failure injection.
pub mod mock {
    use std::collections::HashMap;

    use tokio::sync::RwLock;

    use super::*;

    /// Store operation that can be made to fail.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum MockOperation {
        /// [`DeliveryStore::insert_delivery`].
        Insert,
        /// [`DeliveryStore::begin_attempt`].
        BeginAttempt,
        /// [`DeliveryStore::mark_completed`].
        MarkCompleted,
        /// [`DeliveryStore::mark_failed`].
        MarkFailed,
        /// [`DeliveryStore::mark_dead`].
        MarkDead,
        /// [`DeliveryStore::health_check`].
        HealthCheck,
    }

    #[derive(Default)]
    struct State {
        deliveries: HashMap<DeliveryId, Delivery>,
        by_delivery_id: HashMap<String, DeliveryId>,
        dead_letters: HashMap<DeliveryId, DeadLetter>,
        failures: HashMap<MockOperation, String>,
    }

    impl State {
        fn take_failure(&mut self, op: MockOperation) -> Result<()> {
            match self.failures.remove(&op) {
                Some(message) => Err(CoreError::Database(message)),
                None => Ok(()),
            }
        }

        fn get_mut(&mut self, id: DeliveryId) -> Result<&mut Delivery> {
            self.deliveries.get_mut(&id).ok_or_else(|| missing(id))
        }

        fn leased(&mut self, lease: AttemptLease) -> Option<&mut Delivery> {
            self.deliveries.get_mut(&lease.id).filter(|delivery| lease.holds(delivery))
        }
    }

    fn page_of<T: Clone>(items: &[T], page: PageRequest) -> Vec<T> {
        let offset = usize::try_from(page.offset()).unwrap_or(usize::MAX);
        let limit = usize::try_from(page.limit()).unwrap_or(usize::MAX);
        items.iter().skip(offset).take(limit).cloned().collect()
    }

    fn count(len: usize) -> i64 {
        i64::try_from(len).unwrap_or(i64::MAX)
    }

    /// Mock store for exercising the pipeline without a database.
    ///
    /// A single lock guards all state, so every operation is atomic.
    /// Injected failures fire once.
    #[derive(Clone, Default)]
    pub struct MockDeliveryStore {
        state: Arc<RwLock<State>>,
    }

    impl MockDeliveryStore {
        /// Creates a new mock storage with empty state.
        pub fn new() -> Self {
            Self::default()
        }

        /// Stores `delivery` as-is, replacing any row with the same id.
        pub async fn insert_raw(&self, delivery: Delivery) {
            let mut state = self.state.write().await;
            state.by_delivery_id.insert(delivery.delivery_id.clone(), delivery.id);
            state.deliveries.insert(delivery.id, delivery);
        }

        /// Deletes a delivery and, with it, its dead letter.
        pub async fn remove(&self, id: DeliveryId) -> Option<Delivery> {
            let mut state = self.state.write().await;
            let delivery = state.deliveries.remove(&id)?;
            state.by_delivery_id.remove(&delivery.delivery_id);
            state.dead_letters.remove(&id);
            Some(delivery)
        }

        /// Makes the next call of `op` fail with a database error.
        pub async fn inject_failure(&self, op: MockOperation, message: impl Into<String>) {
            self.state.write().await.failures.insert(op, message.into());
        }

        /// Current copy of a delivery.
        pub async fn get(&self, id: DeliveryId) -> Option<Delivery> {
            self.state.read().await.deliveries.get(&id).cloned()
        }

        /// Number of stored deliveries.
        pub async fn delivery_count(&self) -> usize {
            self.state.read().await.deliveries.len()
        }

        /// Number of stored dead letters.
        pub async fn dead_letter_count(&self) -> usize {
            self.state.read().await.dead_letters.len()
        }
    }

    impl DeliveryStore for MockDeliveryStore {
        fn insert_delivery(
            &self,
            delivery: NewDelivery,
            now: DateTime<Utc>,
        ) -> StoreFuture<'_, InsertOutcome> {
            Box::pin(async move {
                let mut state = self.state.write().await;
                state.take_failure(MockOperation::Insert)?;

                if state.by_delivery_id.contains_key(&delivery.delivery_id) {
                    return Ok(InsertOutcome::Duplicate);
                }

                let delivery = Delivery::from_new(DeliveryId::new(), delivery, now);
                state.by_delivery_id.insert(delivery.delivery_id.clone(), delivery.id);
                state.deliveries.insert(delivery.id, delivery.clone());
                Ok(InsertOutcome::Created(delivery))
            })
        }

        fn find_delivery(&self, id: DeliveryId) -> StoreFuture<'_, Option<Delivery>> {
            Box::pin(async move { Ok(self.get(id).await) })
        }

        fn find_by_delivery_id<'a>(
            &'a self,
            delivery_id: &'a str,
        ) -> StoreFuture<'a, Option<Delivery>> {
            Box::pin(async move {
                let state = self.state.read().await;
                Ok(state
                    .by_delivery_id
                    .get(delivery_id)
                    .and_then(|id| state.deliveries.get(id))
                    .cloned())
            })
        }

        fn begin_attempt(
            &self,
            id: DeliveryId,
            now: DateTime<Utc>,
        ) -> StoreFuture<'_, AttemptClaim> {
            Box::pin(async move {
                let mut state = self.state.write().await;
                state.take_failure(MockOperation::BeginAttempt)?;

                let Some(delivery) = state.deliveries.get_mut(&id) else {
                    return Ok(AttemptClaim::Missing);
                };

                let claimable =
                    matches!(delivery.status, DeliveryStatus::Pending | DeliveryStatus::Failed);
                if !claimable || !delivery.is_due(now) {
                    return Ok(AttemptClaim::rejected(delivery));
                }

                delivery.status = DeliveryStatus::Processing;
                delivery.attempts += 1;
                delivery.generation += 1;
                delivery.next_attempt_at = None;
                delivery.updated_at = now;
                Ok(AttemptClaim::Claimed(delivery.clone()))
            })
        }

        fn mark_completed(
            &self,
            lease: AttemptLease,
            now: DateTime<Utc>,
        ) -> StoreFuture<'_, bool> {
            Box::pin(async move {
                let mut state = self.state.write().await;
                state.take_failure(MockOperation::MarkCompleted)?;

                let Some(delivery) = state.leased(lease) else {
                    return Ok(false);
                };
                delivery.status = DeliveryStatus::Completed;
                delivery.processed_at = Some(now);
                delivery.updated_at = now;
                Ok(true)
            })
        }

        fn mark_failed(
            &self,
            lease: AttemptLease,
            error_message: String,
            next_attempt_at: DateTime<Utc>,
            now: DateTime<Utc>,
        ) -> StoreFuture<'_, bool> {
            Box::pin(async move {
                let mut state = self.state.write().await;
                state.take_failure(MockOperation::MarkFailed)?;

                let Some(delivery) = state.leased(lease) else {
                    return Ok(false);
                };
                delivery.status = DeliveryStatus::Failed;
                delivery.error_message = Some(error_message);
                delivery.next_attempt_at = Some(next_attempt_at);
                delivery.updated_at = now;
                Ok(true)
            })
        }

        fn mark_dead(
            &self,
            lease: AttemptLease,
            error_message: String,
            dead_letter: NewDeadLetter,
            now: DateTime<Utc>,
        ) -> StoreFuture<'_, Option<DeadLetter>> {
            Box::pin(async move {
                let mut state = self.state.write().await;
                state.take_failure(MockOperation::MarkDead)?;

                let Some(delivery) = state.leased(lease) else {
                    return Ok(None);
                };
                delivery.status = DeliveryStatus::Dead;
                delivery.error_message = Some(error_message);
                delivery.next_attempt_at = None;
                delivery.updated_at = now;

                let id = lease.id;
                let record = match state.dead_letters.get(&id) {
                    Some(existing) => DeadLetter {
                        error_class: dead_letter.error_class,
                        error_message: dead_letter.error_message,
                        backtrace: dead_letter.backtrace,
                        failed_at: dead_letter.failed_at,
                        updated_at: now,
                        ..existing.clone()
                    },
                    None => DeadLetter::from_new(id, dead_letter, now),
                };
                state.dead_letters.insert(id, record.clone());
                Ok(Some(record))
            })
        }

        fn reset_for_replay(
            &self,
            id: DeliveryId,
            now: DateTime<Utc>,
        ) -> StoreFuture<'_, Delivery> {
            Box::pin(async move {
                let mut state = self.state.write().await;
                let delivery = state.get_mut(id)?;
                delivery.status = DeliveryStatus::Pending;
                delivery.attempts = 0;
                delivery.generation += 1;
                delivery.error_message = None;
                delivery.processed_at = None;
                delivery.next_attempt_at = None;
                delivery.updated_at = now;
                Ok(delivery.clone())
            })
        }

        fn find_due(
            &self,
            now: DateTime<Utc>,
            pending_before: DateTime<Utc>,
            limit: usize,
        ) -> StoreFuture<'_, Vec<DeliveryId>> {
            Box::pin(async move {
                let state = self.state.read().await;
                let mut due: Vec<&Delivery> = state
                    .deliveries
                    .values()
                    .filter(|d| match d.status {
                        DeliveryStatus::Pending => d.updated_at <= pending_before,
                        DeliveryStatus::Failed => d.is_due(now),
                        _ => false,
                    })
                    .collect();
                due.sort_by_key(|d| d.updated_at);
                Ok(due.into_iter().take(limit).map(|d| d.id).collect())
            })
        }

        fn find_stale_processing(
            &self,
            before: DateTime<Utc>,
            limit: usize,
        ) -> StoreFuture<'_, Vec<Delivery>> {
            Box::pin(async move {
                let state = self.state.read().await;
                let mut stale: Vec<Delivery> = state
                    .deliveries
                    .values()
                    .filter(|d| d.status == DeliveryStatus::Processing && d.updated_at <= before)
                    .cloned()
                    .collect();
                stale.sort_by_key(|d| d.updated_at);
                stale.truncate(limit);
                Ok(stale)
            })
        }

        fn find_dead_letter(&self, id: DeliveryId) -> StoreFuture<'_, Option<DeadLetter>> {
            Box::pin(async move { Ok(self.state.read().await.dead_letters.get(&id).cloned()) })
        }

        fn list_deliveries(
            &self,
            filter: DeliveryFilter,
            page: PageRequest,
        ) -> StoreFuture<'_, Page<Delivery>> {
            Box::pin(async move {
                let state = self.state.read().await;
                let mut matching: Vec<Delivery> =
                    state.deliveries.values().filter(|d| filter.matches(d)).cloned().collect();
                matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

                Ok(Page {
                    items: page_of(&matching, page),
                    current_page: page.page(),
                    total_count: count(matching.len()),
                })
            })
        }

        fn list_dead_letters(
            &self,
            page: PageRequest,
        ) -> StoreFuture<'_, Page<DeadLetterRecord>> {
            Box::pin(async move {
                let state = self.state.read().await;
                let mut records: Vec<DeadLetterRecord> = state
                    .dead_letters
                    .values()
                    .filter_map(|dead_letter| {
                        let delivery =
                            state.deliveries.get(&dead_letter.webhook_delivery_id)?.clone();
                        Some(DeadLetterRecord { dead_letter: dead_letter.clone(), delivery })
                    })
                    .collect();
                records.sort_by(|a, b| b.dead_letter.failed_at.cmp(&a.dead_letter.failed_at));

                Ok(Page {
                    items: page_of(&records, page),
                    current_page: page.page(),
                    total_count: count(records.len()),
                })
            })
        }

        fn health_check(&self) -> StoreFuture<'_, ()> {
            Box::pin(async move { self.state.write().await.take_failure(MockOperation::HealthCheck) })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use hookcatch_core::ProviderKind;
    use serde_json::json;

    use super::{mock::MockDeliveryStore, *};

    fn dead_letter(now: DateTime<Utc>) -> NewDeadLetter {
        NewDeadLetter {
            error_class: "HandlerError".into(),
            error_message: "boom".into(),
            backtrace: None,
            failed_at: now,
        }
    }

    fn new_delivery(delivery_id: &str) -> NewDelivery {
        NewDelivery {
            provider: ProviderKind::GitHub,
            delivery_id: delivery_id.to_string(),
            event_type: "push".to_string(),
            payload: json!({}),
            headers: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn second_insert_with_same_delivery_id_is_duplicate() {
        let store = MockDeliveryStore::new();
        let now = Utc::now();

        let first = store.insert_delivery(new_delivery("gh-1"), now).await.unwrap();
        let second = store.insert_delivery(new_delivery("gh-1"), now).await.unwrap();

        assert!(matches!(first, InsertOutcome::Created(_)));
        assert!(matches!(second, InsertOutcome::Duplicate));
        assert_eq!(store.delivery_count().await, 1);
    }

    #[tokio::test]
    async fn begin_attempt_rejects_in_flight_delivery() {
        let store = MockDeliveryStore::new();
        let now = Utc::now();
        let InsertOutcome::Created(delivery) =
            store.insert_delivery(new_delivery("gh-2"), now).await.unwrap()
        else {
            panic!("expected insert");
        };

        let first = store.begin_attempt(delivery.id, now).await.unwrap();
        let second = store.begin_attempt(delivery.id, now).await.unwrap();

        assert!(matches!(first, AttemptClaim::Claimed(ref d) if d.attempts == 1));
        assert!(matches!(second, AttemptClaim::InFlight));
    }

    #[tokio::test]
    async fn removing_delivery_drops_its_dead_letter() {
        let store = MockDeliveryStore::new();
        let now = Utc::now();
        let InsertOutcome::Created(delivery) =
            store.insert_delivery(new_delivery("gh-3"), now).await.unwrap()
        else {
            panic!("expected insert");
        };
        let AttemptClaim::Claimed(claimed) = store.begin_attempt(delivery.id, now).await.unwrap()
        else {
            panic!("expected claim");
        };
        let dead = store
            .mark_dead(claimed.lease(), "HandlerError: boom".into(), dead_letter(now), now)
            .await
            .unwrap();
        assert!(dead.is_some());
        assert_eq!(store.dead_letter_count().await, 1);

        store.remove(delivery.id).await;

        assert_eq!(store.dead_letter_count().await, 0);
        assert!(store.find_by_delivery_id("gh-3").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn lease_from_before_replay_cannot_transition() {
        let store = MockDeliveryStore::new();
        let now = Utc::now();
        let InsertOutcome::Created(delivery) =
            store.insert_delivery(new_delivery("gh-4"), now).await.unwrap()
        else {
            panic!("expected insert");
        };
        let AttemptClaim::Claimed(stale) = store.begin_attempt(delivery.id, now).await.unwrap()
        else {
            panic!("expected claim");
        };

        store.reset_for_replay(delivery.id, now).await.unwrap();
        let AttemptClaim::Claimed(fresh) = store.begin_attempt(delivery.id, now).await.unwrap()
        else {
            panic!("expected claim after replay");
        };
        assert_eq!(fresh.attempts, stale.attempts);

        let lease = stale.lease();
        assert!(!store.mark_completed(lease, now).await.unwrap());
        assert!(!store.mark_failed(lease, "late".into(), now, now).await.unwrap());
        let dead = store.mark_dead(lease, "late".into(), dead_letter(now), now).await.unwrap();
        assert!(dead.is_none());
        assert_eq!(store.dead_letter_count().await, 0);

        let row = store.get(delivery.id).await.unwrap();
        assert_eq!(row.status, DeliveryStatus::Processing);
        assert_eq!(row.attempts, 1);
        assert!(row.error_message.is_none());

        assert!(store.mark_completed(fresh.lease(), now).await.unwrap());
        assert_eq!(store.get(delivery.id).await.unwrap().status, DeliveryStatus::Completed);
    }

    #[tokio::test]
    async fn injected_failure_fires_once() {
        let store = MockDeliveryStore::new();
        store.inject_failure(mock::MockOperation::HealthCheck, "connection refused").await;

        assert!(store.health_check().await.is_err());
        assert!(store.health_check().await.is_ok());
    }

    #[tokio::test]
    async fn postgres_store_can_be_created() {
        let pool = sqlx_pool();
        let _store = PostgresDeliveryStore::new(Arc::new(Storage::new(pool)));
    }

    fn sqlx_pool() -> hookcatch_core::storage::PgPool {
        hookcatch_core::storage::PgPool::connect_lazy("postgresql://test").unwrap()
    }
}
