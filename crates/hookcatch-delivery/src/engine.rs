//! Delivery engine: worker pool plus recovery sweeper.
//!
//! The sweeper is the durable half of the queue. Each pass it re-enqueues
//! deliveries whose queue entry may have been lost (old `pending` rows and
//! due `failed` rows) and fails attempts stuck in `processing` past the
//! liveness threshold. Ids the queue still holds are left alone, so a
//! backlog is not duplicated on every pass.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use hookcatch_core::Clock;
use serde::{Deserialize, Serialize};
use tokio::{sync::RwLock, task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    error::Result,
    queue::{JobQueue, JobReceiver},
    scheduler::RetryScheduler,
    storage::DeliveryStore,
    worker::EngineStats,
    worker_pool::WorkerPool,
};

/// Configuration for the delivery engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Number of concurrent delivery workers.
    pub worker_count: usize,

    /// Time between sweeper passes.
    pub sweep_interval: Duration,

    /// Rows examined per sweeper pass and category.
    pub sweep_batch_size: usize,

    /// How long an attempt may sit in `processing` before it is presumed
    /// abandoned.
    pub processing_timeout: Duration,

    /// Age after which a `pending` row is assumed to have missed the queue.
    pub pickup_grace: Duration,

    /// Shutdown timeout - maximum time to wait for workers to complete.
    pub shutdown_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_count: crate::DEFAULT_WORKER_COUNT,
            sweep_interval: Duration::from_secs(30),
            sweep_batch_size: crate::DEFAULT_SWEEP_BATCH_SIZE,
            processing_timeout: Duration::from_secs(300),
            pickup_grace: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Counts from one sweeper pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Deliveries put back on the queue.
    pub requeued: usize,
    /// Abandoned attempts routed through the failure transition.
    pub recovered: usize,
}

fn before(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(window).map_or(DateTime::<Utc>::MIN_UTC, |window| now - window)
}

/// Shared pieces the sweeper task needs.
#[derive(Clone)]
struct Sweeper {
    store: Arc<dyn DeliveryStore>,
    queue: Arc<dyn JobQueue>,
    scheduler: Arc<RetryScheduler>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl Sweeper {
    async fn sweep(&self) -> Result<SweepReport> {
        let now = self.clock.now_utc();
        let mut report = SweepReport::default();

        let stale = self
            .store
            .find_stale_processing(
                before(now, self.config.processing_timeout),
                self.config.sweep_batch_size,
            )
            .await?;
        for delivery in &stale {
            self.scheduler.recover_abandoned(delivery, self.config.processing_timeout).await;
            report.recovered += 1;
        }

        let due = self
            .store
            .find_due(now, before(now, self.config.pickup_grace), self.config.sweep_batch_size)
            .await?;
        for id in due {
            if self.queue.is_queued(id).await {
                debug!(delivery_id = %id, "still queued, not requeueing");
                continue;
            }
            match self.queue.enqueue(id, Duration::ZERO).await {
                Ok(()) => report.requeued += 1,
                Err(err) => warn!(delivery_id = %id, error = %err, "sweeper could not enqueue"),
            }
        }

        if report != SweepReport::default() {
            info!(requeued = report.requeued, recovered = report.recovered, "sweep finished");
        }

        Ok(report)
    }

    async fn run(self, cancellation_token: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.sweep_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancellation_token.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(err) = self.sweep().await {
                        error!(error = %err, "sweep failed");
                    }
                }
            }
        }

        debug!("sweeper stopped");
    }
}

/// Runs workers and the sweeper until shut down.
pub struct DeliveryEngine {
    sweeper: Sweeper,
    receiver: JobReceiver,
    stats: Arc<RwLock<EngineStats>>,
    cancellation_token: CancellationToken,
    worker_pool: Option<WorkerPool>,
    sweeper_handle: Option<JoinHandle<()>>,
}

impl DeliveryEngine {
    /// Creates an engine; nothing runs until [`DeliveryEngine::start`].
    pub fn new(
        store: Arc<dyn DeliveryStore>,
        queue: Arc<dyn JobQueue>,
        receiver: JobReceiver,
        scheduler: Arc<RetryScheduler>,
        config: EngineConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            sweeper: Sweeper { store, queue, scheduler, clock, config },
            receiver,
            stats: Arc::new(RwLock::new(EngineStats::default())),
            cancellation_token: CancellationToken::new(),
            worker_pool: None,
            sweeper_handle: None,
        }
    }

    /// Spawns the workers and the sweeper.
    pub async fn start(&mut self) {
        let config = &self.sweeper.config;
        info!(
            worker_count = config.worker_count,
            sweep_interval_secs = config.sweep_interval.as_secs(),
            "starting delivery engine"
        );

        let mut worker_pool = WorkerPool::new(
            config.worker_count,
            self.receiver.clone(),
            self.sweeper.scheduler.clone(),
            self.stats.clone(),
            self.cancellation_token.child_token(),
        );
        worker_pool.spawn_workers().await;
        self.worker_pool = Some(worker_pool);

        let sweeper = self.sweeper.clone();
        let token = self.cancellation_token.child_token();
        self.sweeper_handle = Some(tokio::spawn(sweeper.run(token)));

        info!("delivery engine started");
    }

    /// Runs one sweeper pass immediately.
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be queried.
    pub async fn sweep_once(&self) -> Result<SweepReport> {
        self.sweeper.sweep().await
    }

    /// Snapshot of the engine counters.
    pub async fn stats(&self) -> EngineStats {
        self.stats.read().await.clone()
    }

    /// Stops the sweeper and drains workers within the shutdown timeout.
    ///
    /// # Errors
    ///
    /// Returns error if workers do not stop in time.
    pub async fn shutdown(mut self) -> Result<()> {
        info!("shutting down delivery engine");
        self.cancellation_token.cancel();

        if let Some(handle) = self.sweeper_handle.take() {
            if let Err(err) = handle.await {
                warn!(error = %err, "sweeper task ended abnormally");
            }
        }

        match self.worker_pool.take() {
            Some(pool) => pool.shutdown_graceful(self.sweeper.config.shutdown_timeout).await,
            None => Ok(()),
        }
    }
}

impl Drop for DeliveryEngine {
    fn drop(&mut self) {
        if !self.cancellation_token.is_cancelled() {
            self.cancellation_token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn before_subtracts_window() {
        let now = Utc::now();
        assert_eq!(before(now, Duration::from_secs(60)), now - chrono::Duration::seconds(60));
    }

    #[test]
    fn default_config_matches_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.processing_timeout, Duration::from_secs(300));
        assert_eq!(config.sweep_interval, Duration::from_secs(30));
    }
}
