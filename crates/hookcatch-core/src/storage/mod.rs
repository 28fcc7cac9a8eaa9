//! Postgres persistence for deliveries and dead letters.
//!
//! Repositories own all SQL. Multi-table transitions (dead-lettering) live on
//! [`Storage`] so they run inside one transaction.

use std::sync::Arc;

use chrono::{DateTime, Utc};
pub use sqlx::PgPool;

pub mod dead_letters;
pub mod deliveries;

use crate::{
    error::Result,
    models::{
        AttemptLease, DeadLetter, DeadLetterRecord, DeliveryId, NewDeadLetter, Page, PageRequest,
    },
};

/// Container for the repositories sharing one connection pool.
#[derive(Clone)]
pub struct Storage {
    /// Delivery rows.
    pub deliveries: Arc<deliveries::Repository>,

    /// Dead letter rows.
    pub dead_letters: Arc<dead_letters::Repository>,
}

impl Storage {
    /// Creates a new storage instance with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        let pool = Arc::new(pool);

        Self {
            deliveries: Arc::new(deliveries::Repository::new(pool.clone())),
            dead_letters: Arc::new(dead_letters::Repository::new(pool)),
        }
    }

    /// Verifies database connectivity with `SELECT 1`.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the connection is unhealthy.
    pub async fn health_check(&self) -> Result<()> {
        let _: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&*self.deliveries.pool()).await?;

        Ok(())
    }

    /// Moves the leased attempt to `dead` and writes its dead letter
    /// atomically. Returns `None`, writing nothing, if the lease was lost.
    ///
    /// The dead letter is keyed on the delivery, so a replayed delivery that
    /// dies again overwrites the earlier failure context.
    ///
    /// # Errors
    ///
    /// Returns error if either statement fails.
    pub async fn mark_dead(
        &self,
        lease: AttemptLease,
        error_message: &str,
        dead_letter: &NewDeadLetter,
        now: DateTime<Utc>,
    ) -> Result<Option<DeadLetter>> {
        let mut tx = self.deliveries.pool().begin().await?;

        if !self.deliveries.mark_dead_in_tx(&mut tx, lease, error_message, now).await? {
            tx.rollback().await?;
            return Ok(None);
        }

        let record = self.dead_letters.upsert_in_tx(&mut tx, lease.id, dead_letter, now).await?;
        tx.commit().await?;

        Ok(Some(record))
    }

    /// Lists dead letters newest first with their deliveries attached.
    ///
    /// # Errors
    ///
    /// Returns error if either query fails.
    pub async fn list_dead_letters(&self, page: PageRequest) -> Result<Page<DeadLetterRecord>> {
        let dead_letters = self.dead_letters.list(page).await?;
        let total_count = self.dead_letters.count().await?;

        let ids: Vec<DeliveryId> = dead_letters.iter().map(|d| d.webhook_delivery_id).collect();
        let mut deliveries = self.deliveries.find_many(&ids).await?;

        let items = dead_letters
            .into_iter()
            .filter_map(|dead_letter| {
                let pos =
                    deliveries.iter().position(|d| d.id == dead_letter.webhook_delivery_id)?;
                Some(DeadLetterRecord { dead_letter, delivery: deliveries.swap_remove(pos) })
            })
            .collect();

        Ok(Page { items, current_page: page.page(), total_count })
    }
}
