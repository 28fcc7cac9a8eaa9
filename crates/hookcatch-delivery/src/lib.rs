//! Asynchronous processing of accepted webhook deliveries.
//!
//! Every accepted delivery becomes one queued work item. Workers pull items
//! off the queue and hand them to the [`RetryScheduler`], which owns the
//! lifecycle:
//!
//! ```text
//! pending ──▶ processing ──▶ completed
//!                 │
//!                 ├──▶ failed ──(backoff 30s/120s/600s)──▶ processing
//!                 │
//!                 └──(attempt 3)──▶ dead + dead letter
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use hookcatch_core::{Clock, RealClock};
//! use hookcatch_delivery::{
//!     storage::mock::MockDeliveryStore, DeliveryEngine, DeliveryProcessor, EngineConfig,
//!     InProcessQueue, RetryPolicy, RetryScheduler,
//! };
//!
//! # async fn example() {
//! let clock: Arc<dyn Clock> = Arc::new(RealClock::new());
//! let store = Arc::new(MockDeliveryStore::new());
//! let (queue, receiver) = InProcessQueue::new(clock.clone());
//! let queue = Arc::new(queue);
//!
//! let scheduler = Arc::new(RetryScheduler::new(
//!     store.clone(),
//!     Arc::new(DeliveryProcessor::with_default_handlers()),
//!     queue.clone(),
//!     RetryPolicy::default(),
//!     clock.clone(),
//! ));
//!
//! let mut engine =
//!     DeliveryEngine::new(store, queue, receiver, scheduler, EngineConfig::default(), clock);
//! engine.start().await;
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod engine;
pub mod error;
pub mod handlers;
pub mod processor;
pub mod queue;
pub mod retry;
pub mod scheduler;
pub mod storage;
mod worker;
mod worker_pool;

pub use engine::{DeliveryEngine, EngineConfig, SweepReport};
pub use error::{DeliveryError, Result};
pub use processor::{DeliveryProcessor, WebhookHandler};
pub use queue::{InProcessQueue, JobQueue, JobReceiver};
pub use retry::{RetryContext, RetryDecision, RetryPolicy, MAX_ATTEMPTS};
pub use scheduler::{format_error_message, AttemptOutcome, RetryScheduler, BACKTRACE_LIMIT};
pub use storage::{AttemptClaim, DeliveryStore, InsertOutcome, PostgresDeliveryStore};
pub use worker::EngineStats;

/// Default number of concurrent delivery workers.
pub const DEFAULT_WORKER_COUNT: usize = 4;

/// Default rows examined per sweeper pass.
pub const DEFAULT_SWEEP_BATCH_SIZE: usize = 100;
