//! Queue double that records work items instead of running them.

use std::{sync::Mutex, time::Duration};

use async_trait::async_trait;
use hookcatch_core::DeliveryId;
use hookcatch_delivery::{DeliveryError, JobQueue};

/// Records every `enqueue` call; tests drain it and drive attempts by hand.
///
/// Recorded items count as queued until drained.
#[derive(Debug, Default)]
pub struct RecordingQueue {
    items: Mutex<Vec<(DeliveryId, Duration)>>,
    failing: Mutex<Option<String>>,
}

impl RecordingQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything enqueued so far, oldest first.
    pub fn enqueued(&self) -> Vec<(DeliveryId, Duration)> {
        self.items.lock().map(|items| items.clone()).unwrap_or_default()
    }

    /// Removes and returns everything enqueued so far.
    pub fn drain(&self) -> Vec<(DeliveryId, Duration)> {
        self.items.lock().map(|mut items| std::mem::take(&mut *items)).unwrap_or_default()
    }

    /// Delays recorded for `id`, in order.
    pub fn delays_for(&self, id: DeliveryId) -> Vec<Duration> {
        self.enqueued().into_iter().filter(|(item, _)| *item == id).map(|(_, d)| d).collect()
    }

    /// Makes every following `enqueue` fail until [`RecordingQueue::recover`].
    pub fn fail_with(&self, message: impl Into<String>) {
        if let Ok(mut failing) = self.failing.lock() {
            *failing = Some(message.into());
        }
    }

    /// Accepts work again.
    pub fn recover(&self) {
        if let Ok(mut failing) = self.failing.lock() {
            *failing = None;
        }
    }
}

#[async_trait]
impl JobQueue for RecordingQueue {
    async fn enqueue(&self, id: DeliveryId, delay: Duration) -> hookcatch_delivery::Result<()> {
        let failure = self.failing.lock().ok().and_then(|failing| failing.clone());
        if let Some(message) = failure {
            return Err(DeliveryError::queue(message));
        }

        if let Ok(mut items) = self.items.lock() {
            items.push((id, delay));
        }
        Ok(())
    }

    async fn is_queued(&self, id: DeliveryId) -> bool {
        self.items.lock().is_ok_and(|items| items.iter().any(|(item, _)| *item == id))
    }
}
