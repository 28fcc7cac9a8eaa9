//! Processing state machine.
//!
//! One call to [`RetryScheduler::run_attempt`] is one scheduled attempt:
//!
//! 1. claim the delivery (`processing`, `attempts + 1`), skipping terminal,
//!    in-flight or not-yet-due rows
//! 2. dispatch to the business handler
//! 3. on success mark `completed`
//! 4. on failure either mark `failed` and re-enqueue after backoff, or, once
//!    the budget is spent, write a dead letter and mark `dead`
//!
//! Steps 3 and 4 write through the claim's lease. If a replay or a sweeper
//! recovery took the row in the meantime the attempt is superseded and
//! records nothing.
//!
//! Every failure resolves here; nothing propagates to the intake caller.

use std::{sync::Arc, time::Duration};

use hookcatch_core::{Clock, Delivery, DeliveryId, NewDeadLetter};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    error::{DeliveryError, Result},
    processor::DeliveryProcessor,
    queue::JobQueue,
    retry::{RetryContext, RetryDecision, RetryPolicy},
    storage::{AttemptClaim, DeliveryStore},
};

/// Trace lines kept on a dead letter.
pub const BACKTRACE_LIMIT: usize = 10;

/// What a single attempt did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Handler succeeded.
    Completed {
        /// Attempts including this one.
        attempts: u32,
    },
    /// Failed, another attempt is queued.
    Rescheduled {
        /// Attempts including this one.
        attempts: u32,
        /// Backoff until the next attempt.
        delay: Duration,
    },
    /// Failed with the budget spent; dead letter written.
    DeadLettered {
        /// Attempts including this one.
        attempts: u32,
    },
    /// Nothing ran: terminal, in flight or not yet due.
    Skipped,
    /// The lease was lost before the outcome could be written; nothing
    /// recorded, nothing queued.
    Superseded {
        /// Attempt count the lost lease was claimed at.
        attempts: u32,
    },
    /// Delivery no longer exists.
    Missing,
    /// The store could not record the outcome; the sweeper will retry.
    Unrecorded,
}

/// `"{kind}: {message} (delivery={id}, provider={provider})"`.
pub fn format_error_message(error: &DeliveryError, delivery: &Delivery) -> String {
    format!(
        "{}: {} (delivery={}, provider={})",
        error.kind(),
        error,
        delivery.id,
        delivery.provider
    )
}

/// Drives deliveries through their lifecycle.
pub struct RetryScheduler {
    store: Arc<dyn DeliveryStore>,
    processor: Arc<DeliveryProcessor>,
    queue: Arc<dyn JobQueue>,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl RetryScheduler {
    /// Creates a scheduler.
    pub fn new(
        store: Arc<dyn DeliveryStore>,
        processor: Arc<DeliveryProcessor>,
        queue: Arc<dyn JobQueue>,
        policy: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { store, processor, queue, policy, clock }
    }

    /// Retry policy in force.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs one attempt for delivery `id`.
    #[instrument(skip(self), fields(delivery_id = %id))]
    pub async fn run_attempt(&self, id: DeliveryId) -> AttemptOutcome {
        let claim = match self.store.begin_attempt(id, self.clock.now_utc()).await {
            Ok(claim) => claim,
            Err(err) => {
                error!(error = %err, "could not start attempt, leaving for sweeper");
                return AttemptOutcome::Unrecorded;
            },
        };

        let delivery = match claim {
            AttemptClaim::Claimed(delivery) => delivery,
            AttemptClaim::Missing => {
                warn!("delivery vanished before its attempt");
                return AttemptOutcome::Missing;
            },
            AttemptClaim::Terminal(status) => {
                debug!(%status, "delivery is terminal, skipping");
                return AttemptOutcome::Skipped;
            },
            AttemptClaim::InFlight => {
                debug!("another attempt is in flight, skipping");
                return AttemptOutcome::Skipped;
            },
            AttemptClaim::NotDue(next_attempt_at) => {
                debug!(?next_attempt_at, "attempt fired before backoff elapsed, skipping");
                return AttemptOutcome::Skipped;
            },
        };

        info!(
            attempt = delivery.attempts,
            provider = %delivery.provider,
            event_type = %delivery.event_type,
            "processing delivery"
        );

        let result = match self.processor.process(&delivery).await {
            Ok(()) => self
                .store
                .mark_completed(delivery.lease(), self.clock.now_utc())
                .await
                .map_err(DeliveryError::from),
            Err(err) => Err(err),
        };

        match result {
            Ok(true) => {
                info!(attempt = delivery.attempts, "delivery completed");
                AttemptOutcome::Completed { attempts: delivery.attempt_count() }
            },
            Ok(false) => superseded(&delivery),
            Err(err) => self.fail_attempt(&delivery, &err).await,
        }
    }

    /// Applies the failure transition to a delivery whose attempt failed.
    ///
    /// `delivery` is the row as claimed, so `attempts` already counts the
    /// failed attempt. The write is guarded by its lease; the retry decision
    /// therefore only lands while that count is still current.
    pub async fn fail_attempt(&self, delivery: &Delivery, err: &DeliveryError) -> AttemptOutcome {
        let lease = delivery.lease();
        let now = self.clock.now_utc();
        let attempts = delivery.attempt_count();
        let message = format_error_message(err, delivery);

        match RetryContext::new(attempts, now, &self.policy).decide_retry() {
            RetryDecision::GiveUp { reason } => {
                let dead_letter = NewDeadLetter {
                    error_class: err.kind().to_string(),
                    error_message: err.to_string(),
                    backtrace: err.trace(BACKTRACE_LIMIT),
                    failed_at: now,
                };

                match self.store.mark_dead(lease, message.clone(), dead_letter, now).await {
                    Ok(Some(_)) => {
                        error!(
                            delivery_id = %delivery.id,
                            attempts,
                            %reason,
                            error = %message,
                            "delivery dead-lettered"
                        );
                        AttemptOutcome::DeadLettered { attempts }
                    },
                    Ok(None) => superseded(delivery),
                    Err(store_err) => {
                        error!(
                            delivery_id = %delivery.id,
                            error = %store_err,
                            "could not dead-letter delivery"
                        );
                        AttemptOutcome::Unrecorded
                    },
                }
            },
            RetryDecision::Retry { delay, next_attempt_at } => {
                match self.store.mark_failed(lease, message.clone(), next_attempt_at, now).await {
                    Ok(true) => {},
                    Ok(false) => return superseded(delivery),
                    Err(store_err) => {
                        error!(
                            delivery_id = %delivery.id,
                            error = %store_err,
                            "could not record failed attempt"
                        );
                        return AttemptOutcome::Unrecorded;
                    },
                }

                warn!(
                    delivery_id = %delivery.id,
                    attempts,
                    retry_in_secs = delay.as_secs(),
                    error = %message,
                    "delivery attempt failed, rescheduling"
                );

                if let Err(queue_err) = self.queue.enqueue(delivery.id, delay).await {
                    warn!(
                        delivery_id = %delivery.id,
                        error = %queue_err,
                        "could not enqueue retry, sweeper will pick it up"
                    );
                }

                AttemptOutcome::Rescheduled { attempts, delay }
            },
        }
    }

    /// Treats an attempt stuck in `processing` as failed.
    ///
    /// `delivery` must be the stale row as read, so that a worker which
    /// finishes first wins and the recovery is superseded.
    pub async fn recover_abandoned(
        &self,
        delivery: &Delivery,
        timeout: Duration,
    ) -> AttemptOutcome {
        warn!(
            delivery_id = %delivery.id,
            attempts = delivery.attempts,
            "recovering abandoned attempt"
        );
        let err = DeliveryError::Abandoned { timeout_secs: timeout.as_secs() };
        self.fail_attempt(delivery, &err).await
    }

    /// Operator replay: reset to `pending`, `attempts = 0` and queue now.
    ///
    /// Allowed from any status. Replaying a `processing` delivery revokes the
    /// running attempt's lease: its handler may still finish, but its outcome
    /// is discarded and only the queued attempt counts.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the delivery does not exist, `Persistence` or
    /// `Queue` if the reset or enqueue fails.
    #[instrument(skip(self), fields(delivery_id = %id))]
    pub async fn replay(&self, id: DeliveryId) -> Result<Delivery> {
        if self.store.find_delivery(id).await?.is_none() {
            return Err(DeliveryError::NotFound { id });
        }

        let delivery = self.store.reset_for_replay(id, self.clock.now_utc()).await?;
        self.queue.enqueue(id, Duration::ZERO).await?;

        info!(delivery_id = %delivery.delivery_id, "delivery replayed");
        Ok(delivery)
    }
}

fn superseded(delivery: &Delivery) -> AttemptOutcome {
    warn!(
        delivery_id = %delivery.id,
        attempts = delivery.attempts,
        "attempt lease lost to a replay or recovery, discarding outcome"
    );
    AttemptOutcome::Superseded { attempts: delivery.attempt_count() }
}
