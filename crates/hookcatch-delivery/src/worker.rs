//! Queue consumer running attempts one at a time.

use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    queue::JobReceiver,
    scheduler::{AttemptOutcome, RetryScheduler},
};

/// Counters for engine monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Workers currently running.
    pub active_workers: usize,
    /// Attempts picked off the queue.
    pub attempts_started: u64,
    /// Deliveries completed.
    pub completed: u64,
    /// Failed attempts with a retry queued.
    pub rescheduled: u64,
    /// Deliveries moved to the dead letter store.
    pub dead_lettered: u64,
    /// Queue items that found nothing to do.
    pub skipped: u64,
    /// Attempts whose lease was revoked before they finished.
    pub superseded: u64,
    /// Attempts whose outcome could not be persisted.
    pub unrecorded: u64,
    /// Attempts running right now.
    pub in_flight: u64,
}

impl EngineStats {
    pub(crate) fn record(&mut self, outcome: &AttemptOutcome) {
        match outcome {
            AttemptOutcome::Completed { .. } => self.completed += 1,
            AttemptOutcome::Rescheduled { .. } => self.rescheduled += 1,
            AttemptOutcome::DeadLettered { .. } => self.dead_lettered += 1,
            AttemptOutcome::Skipped | AttemptOutcome::Missing => self.skipped += 1,
            AttemptOutcome::Superseded { .. } => self.superseded += 1,
            AttemptOutcome::Unrecorded => self.unrecorded += 1,
        }
    }
}

/// One queue consumer.
pub struct DeliveryWorker {
    id: usize,
    receiver: JobReceiver,
    scheduler: Arc<RetryScheduler>,
    stats: Arc<RwLock<EngineStats>>,
    cancellation_token: CancellationToken,
}

impl DeliveryWorker {
    /// Creates a worker.
    pub fn new(
        id: usize,
        receiver: JobReceiver,
        scheduler: Arc<RetryScheduler>,
        stats: Arc<RwLock<EngineStats>>,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self { id, receiver, scheduler, stats, cancellation_token }
    }

    /// Consumes the queue until cancelled or the queue closes.
    ///
    /// An attempt that has started always runs to completion; cancellation
    /// is only observed between attempts.
    pub async fn run(&self) {
        info!(worker_id = self.id, "delivery worker starting");

        loop {
            let next = tokio::select! {
                () = self.cancellation_token.cancelled() => break,
                next = self.receiver.recv() => next,
            };

            let Some(delivery_id) = next else {
                debug!(worker_id = self.id, "queue closed");
                break;
            };

            {
                let mut stats = self.stats.write().await;
                stats.attempts_started += 1;
                stats.in_flight += 1;
            }

            let outcome = self.scheduler.run_attempt(delivery_id).await;
            debug!(worker_id = self.id, %delivery_id, ?outcome, "attempt finished");

            let mut stats = self.stats.write().await;
            stats.in_flight = stats.in_flight.saturating_sub(1);
            stats.record(&outcome);
        }

        info!(worker_id = self.id, "delivery worker stopped");
    }
}
