//! Test infrastructure for deterministic pipeline tests.
//!
//! [`TestEnv`] bundles a controllable clock, the in-memory store and a
//! recording queue, and wires them into the scheduler and HTTP router the
//! same way the binary does. Nothing here needs a database.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

use std::{sync::Arc, time::Duration};

use axum::Router;
use hookcatch_api::{create_router, AppState, ProviderSecrets};
use hookcatch_core::{Clock, Delivery, DeliveryId};
use hookcatch_delivery::{
    storage::mock::MockDeliveryStore, AttemptOutcome, DeliveryProcessor, RetryPolicy,
    RetryScheduler,
};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::json;

pub mod fixtures;
pub mod handlers;
pub mod queue;

pub use fixtures::{DeliveryBuilder, WebhookRequest};
pub use handlers::{FailingHandler, GatedHandler, RecordingHandler};
pub use hookcatch_core::TestClock;
pub use queue::RecordingQueue;

/// GitHub secret configured in every [`TestEnv`].
pub const GITHUB_SECRET: &str = "test-github-secret";
/// Stripe secret configured in every [`TestEnv`].
pub const STRIPE_SECRET: &str = "whsec_test";
/// Generic secret configured in every [`TestEnv`].
pub const GENERIC_SECRET: &str = "test-generic-secret";
/// Admin JWT secret configured in every [`TestEnv`].
pub const JWT_SECRET: &str = "test-jwt-secret";

/// In-memory pipeline with virtual time.
pub struct TestEnv {
    /// Deterministic clock shared by every component.
    pub clock: Arc<TestClock>,
    /// In-memory delivery store.
    pub store: Arc<MockDeliveryStore>,
    /// Queue that records instead of running.
    pub queue: Arc<RecordingQueue>,
    /// Scheduler over `store` and `queue`.
    pub scheduler: Arc<RetryScheduler>,
}

impl TestEnv {
    /// Environment with the built-in handler table.
    pub fn new() -> Self {
        Self::with_processor(DeliveryProcessor::with_default_handlers())
    }

    /// Environment dispatching through `processor`.
    pub fn with_processor(processor: DeliveryProcessor) -> Self {
        let clock = Arc::new(TestClock::new());
        let store = Arc::new(MockDeliveryStore::new());
        let queue = Arc::new(RecordingQueue::new());
        let scheduler = Arc::new(RetryScheduler::new(
            store.clone(),
            Arc::new(processor),
            queue.clone(),
            RetryPolicy::default(),
            clock.clone(),
        ));

        Self { clock, store, queue, scheduler }
    }

    /// Provider secrets matching the constants above.
    pub fn secrets() -> ProviderSecrets {
        ProviderSecrets {
            github: GITHUB_SECRET.to_string(),
            stripe: STRIPE_SECRET.to_string(),
            generic: GENERIC_SECRET.to_string(),
            stripe_tolerance: Duration::from_secs(300),
        }
    }

    /// Application state over this environment.
    pub fn app_state(&self) -> AppState {
        AppState::new(
            self.store.clone(),
            self.queue.clone(),
            self.scheduler.clone(),
            Self::secrets(),
            JWT_SECRET,
            self.clock.clone(),
        )
    }

    /// Full HTTP router over this environment.
    pub fn router(&self) -> Router {
        create_router(self.app_state())
    }

    /// Valid admin bearer token without expiry.
    pub fn admin_token(&self) -> String {
        encode(
            &Header::default(),
            &json!({ "sub": "ops" }),
            &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
        )
        .expect("token encodes")
    }

    /// Current virtual time as Unix seconds.
    pub fn unix_now(&self) -> i64 {
        self.clock.unix_timestamp()
    }

    /// Moves virtual time forward.
    pub fn advance(&self, duration: Duration) {
        self.clock.advance(duration);
    }

    /// Stores `delivery` as-is.
    pub async fn seed(&self, delivery: Delivery) -> DeliveryId {
        let id = delivery.id;
        self.store.insert_raw(delivery).await;
        id
    }

    /// Current state of a delivery.
    pub async fn delivery(&self, id: DeliveryId) -> Delivery {
        self.store.get(id).await.expect("delivery exists")
    }

    /// Runs queued attempts, advancing the clock past each delay, until the
    /// queue is empty or `max_steps` attempts ran.
    pub async fn drain_queue(&self, max_steps: usize) -> Vec<AttemptOutcome> {
        let mut outcomes = Vec::new();
        while outcomes.len() < max_steps {
            let batch = self.queue.drain();
            if batch.is_empty() {
                break;
            }
            for (id, delay) in batch {
                self.clock.advance(delay);
                outcomes.push(self.scheduler.run_attempt(id).await);
            }
        }
        outcomes
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}
