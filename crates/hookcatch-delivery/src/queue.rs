//! Work queue boundary and the in-process implementation.
//!
//! The state machine only needs "run delivery X, optionally after D". The
//! in-process queue covers that with an unbounded channel plus one timer
//! task per delayed item; the sweeper re-enqueues anything a restart loses.

use std::{
    collections::{hash_map::Entry, HashMap},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use hookcatch_core::{Clock, DeliveryId};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{DeliveryError, Result};

/// Schedules processing of a delivery.
#[async_trait]
pub trait JobQueue: Send + Sync + 'static {
    /// Queues delivery `id`, to run no earlier than `delay` from now.
    async fn enqueue(&self, id: DeliveryId, delay: Duration) -> Result<()>;

    /// Whether `id` is already waiting, immediately or delayed.
    ///
    /// The sweeper skips ids for which this holds. Queues that cannot tell
    /// report `false`.
    async fn is_queued(&self, _id: DeliveryId) -> bool {
        false
    }
}

/// Ids sent or scheduled but not yet received, with multiplicity.
#[derive(Clone, Default)]
struct Outstanding(Arc<Mutex<HashMap<DeliveryId, usize>>>);

impl Outstanding {
    async fn add(&self, id: DeliveryId) {
        *self.0.lock().await.entry(id).or_default() += 1;
    }

    async fn remove(&self, id: DeliveryId) {
        if let Entry::Occupied(mut entry) = self.0.lock().await.entry(id) {
            *entry.get_mut() -= 1;
            if *entry.get() == 0 {
                entry.remove();
            }
        }
    }

    async fn contains(&self, id: DeliveryId) -> bool {
        self.0.lock().await.contains_key(&id)
    }
}

/// Consumer half of [`InProcessQueue`], shared by all workers.
#[derive(Clone)]
pub struct JobReceiver {
    inner: Arc<Mutex<mpsc::UnboundedReceiver<DeliveryId>>>,
    outstanding: Outstanding,
}

impl JobReceiver {
    /// Waits for the next delivery. `None` once every sender is gone.
    pub async fn recv(&self) -> Option<DeliveryId> {
        let id = self.inner.lock().await.recv().await?;
        self.outstanding.remove(id).await;
        Some(id)
    }
}

/// Channel-backed queue with clock-driven delays.
#[derive(Clone)]
pub struct InProcessQueue {
    sender: mpsc::UnboundedSender<DeliveryId>,
    clock: Arc<dyn Clock>,
    cancellation_token: CancellationToken,
    outstanding: Outstanding,
}

impl InProcessQueue {
    /// Creates the queue and its consumer half.
    pub fn new(clock: Arc<dyn Clock>) -> (Self, JobReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let outstanding = Outstanding::default();
        let queue = Self {
            sender,
            clock,
            cancellation_token: CancellationToken::new(),
            outstanding: outstanding.clone(),
        };
        (queue, JobReceiver { inner: Arc::new(Mutex::new(receiver)), outstanding })
    }

    /// Drops pending delayed items; already queued items stay queued.
    pub fn close(&self) {
        self.cancellation_token.cancel();
    }
}

#[async_trait]
impl JobQueue for InProcessQueue {
    async fn enqueue(&self, id: DeliveryId, delay: Duration) -> Result<()> {
        if self.cancellation_token.is_cancelled() {
            return Err(DeliveryError::queue("queue is closed"));
        }

        self.outstanding.add(id).await;

        if delay.is_zero() {
            if self.sender.send(id).is_err() {
                self.outstanding.remove(id).await;
                return Err(DeliveryError::queue("queue receiver dropped"));
            }
            return Ok(());
        }

        debug!(delivery_id = %id, delay_secs = delay.as_secs(), "scheduling delayed attempt");

        let sender = self.sender.clone();
        let clock = self.clock.clone();
        let token = self.cancellation_token.clone();
        let outstanding = self.outstanding.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = clock.sleep(delay) => {
                    if sender.send(id).is_err() {
                        debug!(delivery_id = %id, "queue closed before delayed attempt fired");
                        outstanding.remove(id).await;
                    }
                }
                () = token.cancelled() => outstanding.remove(id).await,
            }
        });

        Ok(())
    }

    async fn is_queued(&self, id: DeliveryId) -> bool {
        self.outstanding.contains(id).await
    }
}
