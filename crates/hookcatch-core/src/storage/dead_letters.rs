//! Repository for `dead_letters`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};

use crate::{
    error::Result,
    models::{DeadLetter, DeadLetterId, DeliveryId, NewDeadLetter, PageRequest},
};

/// Repository for dead letter rows.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Writes the dead letter for `delivery`, replacing any earlier one.
    ///
    /// # Errors
    ///
    /// Returns error if the upsert fails.
    pub async fn upsert_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        delivery: DeliveryId,
        dead_letter: &NewDeadLetter,
        now: DateTime<Utc>,
    ) -> Result<DeadLetter> {
        let record = sqlx::query_as::<_, DeadLetter>(
            r#"
            INSERT INTO dead_letters (
                id, webhook_delivery_id, error_class, error_message, backtrace,
                failed_at, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
            ON CONFLICT (webhook_delivery_id) DO UPDATE
            SET error_class = EXCLUDED.error_class,
                error_message = EXCLUDED.error_message,
                backtrace = EXCLUDED.backtrace,
                failed_at = EXCLUDED.failed_at,
                updated_at = EXCLUDED.updated_at
            RETURNING id, webhook_delivery_id, error_class, error_message, backtrace,
                      failed_at, created_at, updated_at
            "#,
        )
        .bind(DeadLetterId::new())
        .bind(delivery)
        .bind(&dead_letter.error_class)
        .bind(&dead_letter.error_message)
        .bind(&dead_letter.backtrace)
        .bind(dead_letter.failed_at)
        .bind(now)
        .fetch_one(&mut **tx)
        .await?;

        Ok(record)
    }

    /// Finds the dead letter belonging to `delivery`.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_delivery(&self, delivery: DeliveryId) -> Result<Option<DeadLetter>> {
        let record = sqlx::query_as::<_, DeadLetter>(
            r#"
            SELECT id, webhook_delivery_id, error_class, error_message, backtrace,
                   failed_at, created_at, updated_at
            FROM dead_letters
            WHERE webhook_delivery_id = $1
            "#,
        )
        .bind(delivery)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(record)
    }

    /// Lists dead letters, most recent failure first.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn list(&self, page: PageRequest) -> Result<Vec<DeadLetter>> {
        let records = sqlx::query_as::<_, DeadLetter>(
            r#"
            SELECT id, webhook_delivery_id, error_class, error_message, backtrace,
                   failed_at, created_at, updated_at
            FROM dead_letters
            ORDER BY failed_at DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&*self.pool)
        .await?;

        Ok(records)
    }

    /// Total number of dead letters.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn count(&self) -> Result<i64> {
        let total = sqlx::query_scalar("SELECT COUNT(*) FROM dead_letters")
            .fetch_one(&*self.pool)
            .await?;

        Ok(total)
    }
}
