//! Repository for `webhook_deliveries`.
//!
//! The unique index on `delivery_id` is the authoritative idempotency guard;
//! [`Repository::insert`] reports a conflict as `None` instead of an error.
//! [`Repository::begin_attempt`] is a single conditional `UPDATE` so two
//! workers can never both start the same attempt. Transitions out of
//! `processing` match on the claim's [`AttemptLease`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{Executor, PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::{
    error::Result,
    models::{AttemptLease, Delivery, DeliveryFilter, DeliveryId, DeliveryStatus, PageRequest},
};

/// Repository for delivery rows.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Returns a reference to the database pool.
    pub fn pool(&self) -> Arc<PgPool> {
        self.pool.clone()
    }

    /// Inserts a pending delivery unless its `delivery_id` is taken.
    ///
    /// Returns `None` on conflict, which callers treat as a duplicate.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails for any other reason.
    pub async fn insert(&self, delivery: &Delivery) -> Result<Option<Delivery>> {
        let inserted = sqlx::query_as::<_, Delivery>(
            r#"
            INSERT INTO webhook_deliveries (
                id, provider, delivery_id, event_type, payload, headers,
                status, attempts, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, 0, $8, $8)
            ON CONFLICT (delivery_id) DO NOTHING
            RETURNING id, provider, delivery_id, event_type, payload, headers, status,
                      attempts, error_message, processed_at, next_attempt_at,
                      created_at, updated_at, generation
            "#,
        )
        .bind(delivery.id)
        .bind(delivery.provider.as_str())
        .bind(&delivery.delivery_id)
        .bind(&delivery.event_type)
        .bind(&delivery.payload)
        .bind(&delivery.headers)
        .bind(DeliveryStatus::Pending.as_str())
        .bind(delivery.created_at)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(inserted)
    }

    /// Finds a delivery by primary key.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_id(&self, id: DeliveryId) -> Result<Option<Delivery>> {
        let delivery = sqlx::query_as::<_, Delivery>(
            r#"
            SELECT id, provider, delivery_id, event_type, payload, headers, status,
                   attempts, error_message, processed_at, next_attempt_at,
                   created_at, updated_at, generation
            FROM webhook_deliveries
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(delivery)
    }

    /// Finds a delivery by its provider-assigned identifier.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_delivery_id(&self, delivery_id: &str) -> Result<Option<Delivery>> {
        let delivery = sqlx::query_as::<_, Delivery>(
            r#"
            SELECT id, provider, delivery_id, event_type, payload, headers, status,
                   attempts, error_message, processed_at, next_attempt_at,
                   created_at, updated_at, generation
            FROM webhook_deliveries
            WHERE delivery_id = $1
            "#,
        )
        .bind(delivery_id)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(delivery)
    }

    /// Loads several deliveries at once, in no particular order.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_many(&self, ids: &[DeliveryId]) -> Result<Vec<Delivery>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let uuids: Vec<Uuid> = ids.iter().map(|id| id.0).collect();
        let deliveries = sqlx::query_as::<_, Delivery>(
            r#"
            SELECT id, provider, delivery_id, event_type, payload, headers, status,
                   attempts, error_message, processed_at, next_attempt_at,
                   created_at, updated_at, generation
            FROM webhook_deliveries
            WHERE id = ANY($1)
            "#,
        )
        .bind(&uuids)
        .fetch_all(&*self.pool)
        .await?;

        Ok(deliveries)
    }

    /// Starts an attempt: `processing`, `attempts + 1`, new lease generation.
    ///
    /// Only matches a `pending` or `failed` row whose backoff deadline has
    /// passed. Returns `None` when nothing matched; the caller inspects the
    /// row to find out why.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn begin_attempt(
        &self,
        id: DeliveryId,
        now: DateTime<Utc>,
    ) -> Result<Option<Delivery>> {
        let claimed = sqlx::query_as::<_, Delivery>(
            r#"
            UPDATE webhook_deliveries
            SET status = 'processing',
                attempts = attempts + 1,
                generation = generation + 1,
                next_attempt_at = NULL,
                updated_at = $2
            WHERE id = $1
              AND status IN ('pending', 'failed')
              AND (next_attempt_at IS NULL OR next_attempt_at <= $2)
            RETURNING id, provider, delivery_id, event_type, payload, headers, status,
                      attempts, error_message, processed_at, next_attempt_at,
                      created_at, updated_at, generation
            "#,
        )
        .bind(id)
        .bind(now)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(claimed)
    }

    /// Marks the leased attempt completed and stamps `processed_at`.
    /// Returns `false` if the lease was lost.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn mark_completed(&self, lease: AttemptLease, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE webhook_deliveries
            SET status = 'completed', processed_at = $3, updated_at = $3
            WHERE id = $1 AND status = 'processing' AND generation = $2
            "#,
        )
        .bind(lease.id)
        .bind(lease.generation)
        .bind(now)
        .execute(&*self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Marks the leased attempt failed with its next attempt deadline.
    /// Returns `false` if the lease was lost.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn mark_failed(
        &self,
        lease: AttemptLease,
        error_message: &str,
        next_attempt_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE webhook_deliveries
            SET status = 'failed', error_message = $3, next_attempt_at = $4, updated_at = $5
            WHERE id = $1 AND status = 'processing' AND generation = $2
            "#,
        )
        .bind(lease.id)
        .bind(lease.generation)
        .bind(error_message)
        .bind(next_attempt_at)
        .bind(now)
        .execute(&*self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Marks the leased attempt dead within a transaction.
    /// Returns `false` if the lease was lost.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn mark_dead_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        lease: AttemptLease,
        error_message: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.mark_dead_impl(&mut **tx, lease, error_message, now).await
    }

    async fn mark_dead_impl<'e, E>(
        &self,
        executor: E,
        lease: AttemptLease,
        error_message: &str,
        now: DateTime<Utc>,
    ) -> Result<bool>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let result = sqlx::query(
            r#"
            UPDATE webhook_deliveries
            SET status = 'dead', error_message = $3, next_attempt_at = NULL, updated_at = $4
            WHERE id = $1 AND status = 'processing' AND generation = $2
            "#,
        )
        .bind(lease.id)
        .bind(lease.generation)
        .bind(error_message)
        .bind(now)
        .execute(executor)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Resets a delivery to a fresh `pending` state for operator replay.
    ///
    /// Bumps the lease generation, so an attempt still running against the
    /// old state can no longer record its outcome.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn reset_for_replay(
        &self,
        id: DeliveryId,
        now: DateTime<Utc>,
    ) -> Result<Option<Delivery>> {
        let delivery = sqlx::query_as::<_, Delivery>(
            r#"
            UPDATE webhook_deliveries
            SET status = 'pending',
                attempts = 0,
                generation = generation + 1,
                error_message = NULL,
                processed_at = NULL,
                next_attempt_at = NULL,
                updated_at = $2
            WHERE id = $1
            RETURNING id, provider, delivery_id, event_type, payload, headers, status,
                      attempts, error_message, processed_at, next_attempt_at,
                      created_at, updated_at, generation
            "#,
        )
        .bind(id)
        .bind(now)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(delivery)
    }

    /// Deliveries that should be on the queue but may not be.
    ///
    /// Covers `pending` rows older than `pending_before` (lost enqueue) and
    /// `failed` rows whose backoff has elapsed (lost timer).
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_due(
        &self,
        now: DateTime<Utc>,
        pending_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<DeliveryId>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id FROM webhook_deliveries
            WHERE (status = 'pending' AND updated_at <= $2)
               OR (status = 'failed' AND (next_attempt_at IS NULL OR next_attempt_at <= $1))
            ORDER BY updated_at ASC
            LIMIT $3
            "#,
        )
        .bind(now)
        .bind(pending_before)
        .bind(limit)
        .fetch_all(&*self.pool)
        .await?;

        Ok(ids.into_iter().map(DeliveryId).collect())
    }

    /// `processing` rows untouched since `before`, presumed abandoned.
    ///
    /// Uses `FOR UPDATE SKIP LOCKED` so concurrent sweepers split the work.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_stale_processing(
        &self,
        before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Delivery>> {
        let mut tx = self.pool.begin().await?;

        let stale = sqlx::query_as::<_, Delivery>(
            r#"
            SELECT id, provider, delivery_id, event_type, payload, headers, status,
                   attempts, error_message, processed_at, next_attempt_at,
                   created_at, updated_at, generation
            FROM webhook_deliveries
            WHERE status = 'processing' AND updated_at <= $1
            ORDER BY updated_at ASC
            LIMIT $2
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(before)
        .bind(limit)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(stale)
    }

    /// Lists deliveries newest first, with the unpaged total.
    ///
    /// # Errors
    ///
    /// Returns error if either query fails.
    pub async fn list(
        &self,
        filter: DeliveryFilter,
        page: PageRequest,
    ) -> Result<(Vec<Delivery>, i64)> {
        let provider = filter.provider.map(|p| p.as_str());
        let status = filter.status.map(|s| s.as_str());

        let deliveries = sqlx::query_as::<_, Delivery>(
            r#"
            SELECT id, provider, delivery_id, event_type, payload, headers, status,
                   attempts, error_message, processed_at, next_attempt_at,
                   created_at, updated_at, generation
            FROM webhook_deliveries
            WHERE ($1::text IS NULL OR provider = $1)
              AND ($2::text IS NULL OR status = $2)
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(provider)
        .bind(status)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&*self.pool)
        .await?;

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM webhook_deliveries
            WHERE ($1::text IS NULL OR provider = $1)
              AND ($2::text IS NULL OR status = $2)
            "#,
        )
        .bind(provider)
        .bind(status)
        .fetch_one(&*self.pool)
        .await?;

        Ok((deliveries, total))
    }
}
