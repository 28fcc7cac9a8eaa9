//! Spawns the delivery workers and drains them on shutdown.

use std::{sync::Arc, time::Duration};

use tokio::{sync::RwLock, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    error::{DeliveryError, Result},
    queue::JobReceiver,
    scheduler::RetryScheduler,
    worker::{DeliveryWorker, EngineStats},
};

/// Supervised set of delivery workers sharing one queue.
pub struct WorkerPool {
    worker_count: usize,
    receiver: JobReceiver,
    scheduler: Arc<RetryScheduler>,
    stats: Arc<RwLock<EngineStats>>,
    cancellation_token: CancellationToken,
    worker_handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Create a new worker pool.
    pub fn new(
        worker_count: usize,
        receiver: JobReceiver,
        scheduler: Arc<RetryScheduler>,
        stats: Arc<RwLock<EngineStats>>,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            worker_count,
            receiver,
            scheduler,
            stats,
            cancellation_token,
            worker_handles: Vec::new(),
        }
    }

    /// Spawn all configured workers and begin processing.
    ///
    /// Returns immediately after spawning; workers run until the
    /// cancellation token fires.
    pub async fn spawn_workers(&mut self) {
        info!(worker_count = self.worker_count, "spawning delivery workers");

        self.stats.write().await.active_workers = self.worker_count;

        for worker_id in 0..self.worker_count {
            let worker = DeliveryWorker::new(
                worker_id,
                self.receiver.clone(),
                self.scheduler.clone(),
                self.stats.clone(),
                self.cancellation_token.clone(),
            );

            self.worker_handles.push(tokio::spawn(async move { worker.run().await }));
        }
    }

    /// Stops all workers, letting in-flight attempts finish.
    ///
    /// # Errors
    ///
    /// Returns `ShutdownTimeout` if workers outlive `timeout`.
    pub async fn shutdown_graceful(mut self, timeout: Duration) -> Result<()> {
        info!(
            worker_count = self.worker_handles.len(),
            timeout_seconds = timeout.as_secs(),
            "initiating graceful worker shutdown"
        );

        self.cancellation_token.cancel();

        let handles = std::mem::take(&mut self.worker_handles);
        let stats = self.stats.clone();
        let shutdown_future = async move {
            let mut panics = 0_usize;

            for (worker_id, handle) in handles.into_iter().enumerate() {
                if let Err(join_error) = handle.await {
                    let panic =
                        DeliveryError::WorkerPanic { worker_id, error: join_error.to_string() };
                    error!(error = %panic, "worker task panicked during shutdown");
                    panics += 1;
                }
            }

            stats.write().await.active_workers = 0;
            panics
        };

        match tokio::time::timeout(timeout, shutdown_future).await {
            Ok(panics) => {
                if panics > 0 {
                    warn!(panics, "some workers panicked before shutdown");
                }
                info!("worker pool shutdown completed");
                Ok(())
            },
            Err(_timeout) => {
                error!(
                    timeout_seconds = timeout.as_secs(),
                    "worker shutdown timed out, some workers may still be running"
                );
                Err(DeliveryError::ShutdownTimeout { timeout })
            },
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        let active_count = self.worker_handles.iter().filter(|h| !h.is_finished()).count();

        if active_count > 0 && !self.cancellation_token.is_cancelled() {
            error!(
                active_workers = active_count,
                "WorkerPool dropped with active workers, forcing cancellation"
            );
            self.cancellation_token.cancel();
        }
    }
}
