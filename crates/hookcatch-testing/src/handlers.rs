//! Business handler doubles.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use async_trait::async_trait;
use hookcatch_core::Delivery;
use hookcatch_delivery::WebhookHandler;
use tokio::sync::Notify;

/// Counts invocations and succeeds.
#[derive(Debug, Default, Clone)]
pub struct RecordingHandler {
    calls: Arc<AtomicUsize>,
}

impl RecordingHandler {
    /// Creates a handler with zero calls.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times `handle` ran.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WebhookHandler for RecordingHandler {
    fn name(&self) -> &'static str {
        "RecordingHandler"
    }

    async fn handle(&self, _delivery: &Delivery) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Fails a set number of times, then succeeds.
#[derive(Debug, Clone)]
pub struct FailingHandler {
    failures_left: Arc<AtomicUsize>,
    calls: Arc<AtomicUsize>,
    message: &'static str,
}

impl FailingHandler {
    /// Fails on every call.
    pub fn always(message: &'static str) -> Self {
        Self::times(usize::MAX, message)
    }

    /// Fails on the first `n` calls.
    pub fn times(n: usize, message: &'static str) -> Self {
        Self {
            failures_left: Arc::new(AtomicUsize::new(n)),
            calls: Arc::new(AtomicUsize::new(0)),
            message,
        }
    }

    /// Number of times `handle` ran.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WebhookHandler for FailingHandler {
    fn name(&self) -> &'static str {
        "FailingHandler"
    }

    async fn handle(&self, _delivery: &Delivery) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();

        if failed {
            anyhow::bail!(self.message);
        }
        Ok(())
    }
}

/// Parks its first call until [`GatedHandler::release`], then fails or
/// succeeds as configured. Later calls run straight through.
///
/// Lets a test act on a delivery while an attempt is still in flight.
#[derive(Debug, Clone)]
pub struct GatedHandler {
    entered: Arc<Notify>,
    gate: Arc<Notify>,
    calls: Arc<AtomicUsize>,
    failure: Option<&'static str>,
}

impl GatedHandler {
    /// Every call succeeds once through the gate.
    pub fn succeeding() -> Self {
        Self::build(None)
    }

    /// Every call fails with `message` once through the gate.
    pub fn failing(message: &'static str) -> Self {
        Self::build(Some(message))
    }

    fn build(failure: Option<&'static str>) -> Self {
        Self {
            entered: Arc::new(Notify::new()),
            gate: Arc::new(Notify::new()),
            calls: Arc::new(AtomicUsize::new(0)),
            failure,
        }
    }

    /// Resolves once the first call is parked at the gate.
    pub async fn wait_until_entered(&self) {
        self.entered.notified().await;
    }

    /// Lets the parked call finish.
    pub fn release(&self) {
        self.gate.notify_one();
    }

    /// Number of times `handle` ran.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WebhookHandler for GatedHandler {
    fn name(&self) -> &'static str {
        "GatedHandler"
    }

    async fn handle(&self, _delivery: &Delivery) -> anyhow::Result<()> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            self.entered.notify_one();
            self.gate.notified().await;
        }

        match self.failure {
            Some(message) => anyhow::bail!(message),
            None => Ok(()),
        }
    }
}
