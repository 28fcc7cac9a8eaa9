//! Integration tests for the processing state machine.
//!
//! Drives deliveries through `RetryScheduler` against the in-memory store
//! and a recording queue, with virtual time.

use std::{sync::Arc, time::Duration};

use hookcatch_core::{Clock, DeliveryStatus, ProviderKind};
use hookcatch_delivery::{
    storage::mock::MockOperation, AttemptOutcome, DeliveryProcessor, DeliveryStore, MAX_ATTEMPTS,
};
use hookcatch_testing::{
    DeliveryBuilder, FailingHandler, GatedHandler, RecordingHandler, TestEnv,
};

fn env_with(handler: Arc<dyn hookcatch_delivery::WebhookHandler>) -> TestEnv {
    let mut processor = DeliveryProcessor::new();
    processor.register(ProviderKind::GitHub, "push", handler);
    TestEnv::with_processor(processor)
}

fn pending(env: &TestEnv) -> hookcatch_core::Delivery {
    DeliveryBuilder::new().created_at(env.clock.now_utc()).build()
}

#[tokio::test]
async fn successful_attempt_completes_delivery() {
    let handler = RecordingHandler::new();
    let env = env_with(Arc::new(handler.clone()));
    let id = env.seed(pending(&env)).await;

    let outcome = env.scheduler.run_attempt(id).await;

    assert_eq!(outcome, AttemptOutcome::Completed { attempts: 1 });
    let delivery = env.delivery(id).await;
    assert_eq!(delivery.status, DeliveryStatus::Completed);
    assert_eq!(delivery.attempts, 1);
    assert_eq!(delivery.processed_at, Some(env.clock.now_utc()));
    assert_eq!(handler.calls(), 1);
}

#[tokio::test]
async fn failures_back_off_then_dead_letter_exactly_once() {
    let handler = FailingHandler::always("downstream unavailable");
    let env = env_with(Arc::new(handler.clone()));
    let id = env.seed(pending(&env)).await;

    let first = env.scheduler.run_attempt(id).await;
    assert_eq!(first, AttemptOutcome::Rescheduled { attempts: 1, delay: Duration::from_secs(30) });
    let delivery = env.delivery(id).await;
    assert_eq!(delivery.status, DeliveryStatus::Failed);
    assert!(delivery
        .error_message
        .as_deref()
        .is_some_and(|m| m.starts_with("HandlerError: downstream unavailable")));

    let outcomes = env.drain_queue(10).await;
    assert_eq!(outcomes, vec![
        AttemptOutcome::Rescheduled { attempts: 2, delay: Duration::from_secs(120) },
        AttemptOutcome::DeadLettered { attempts: 3 },
    ]);

    let delivery = env.delivery(id).await;
    assert_eq!(delivery.status, DeliveryStatus::Dead);
    assert_eq!(delivery.attempt_count(), MAX_ATTEMPTS);
    assert_eq!(handler.calls(), 3);
    assert_eq!(env.store.dead_letter_count().await, 1);

    let dead_letter = env.store.find_dead_letter(id).await.unwrap().expect("dead letter written");
    assert_eq!(dead_letter.error_class, "HandlerError");
    assert_eq!(dead_letter.error_message, "downstream unavailable");
    assert!(dead_letter.backtrace.is_some_and(|trace| trace.lines().count() <= 10));
}

#[tokio::test]
async fn third_failure_from_failed_state_goes_dead() {
    let env = env_with(Arc::new(FailingHandler::always("still broken")));
    let delivery = DeliveryBuilder::new()
        .created_at(env.clock.now_utc())
        .state(DeliveryStatus::Failed, 2)
        .error("HandlerError: still broken")
        .build();
    let id = env.seed(delivery).await;

    let outcome = env.scheduler.run_attempt(id).await;

    assert_eq!(outcome, AttemptOutcome::DeadLettered { attempts: 3 });
    assert_eq!(env.delivery(id).await.status, DeliveryStatus::Dead);
    assert!(env.queue.enqueued().is_empty(), "dead deliveries are not requeued");
}

#[tokio::test]
async fn recovery_after_transient_failure() {
    let handler = FailingHandler::times(1, "flaky");
    let env = env_with(Arc::new(handler.clone()));
    let id = env.seed(pending(&env)).await;

    env.scheduler.run_attempt(id).await;
    let outcomes = env.drain_queue(5).await;

    assert_eq!(outcomes, vec![AttemptOutcome::Completed { attempts: 2 }]);
    assert_eq!(env.delivery(id).await.status, DeliveryStatus::Completed);
    assert_eq!(handler.calls(), 2);
}

#[tokio::test]
async fn retries_are_queued_with_fixed_backoff() {
    let env = env_with(Arc::new(FailingHandler::always("nope")));
    let id = env.seed(pending(&env)).await;

    env.scheduler.run_attempt(id).await;
    let first_failure = env.delivery(id).await;
    assert_eq!(
        first_failure.next_attempt_at,
        Some(env.clock.now_utc() + chrono::Duration::seconds(30))
    );

    env.advance(Duration::from_secs(30));
    env.scheduler.run_attempt(id).await;
    env.advance(Duration::from_secs(120));
    env.scheduler.run_attempt(id).await;

    assert_eq!(env.queue.delays_for(id), vec![Duration::from_secs(30), Duration::from_secs(120)]);
    assert_eq!(env.delivery(id).await.status, DeliveryStatus::Dead);
}

#[tokio::test]
async fn terminal_states_are_sticky() {
    let handler = RecordingHandler::new();
    let env = env_with(Arc::new(handler.clone()));

    for status in [DeliveryStatus::Completed, DeliveryStatus::Dead] {
        let delivery =
            DeliveryBuilder::new().created_at(env.clock.now_utc()).state(status, 1).build();
        let id = env.seed(delivery).await;

        assert_eq!(env.scheduler.run_attempt(id).await, AttemptOutcome::Skipped);
        let after = env.delivery(id).await;
        assert_eq!(after.status, status);
        assert_eq!(after.attempts, 1);
    }

    assert_eq!(handler.calls(), 0);
}

#[tokio::test]
async fn early_retry_is_skipped_until_backoff_elapses() {
    let env = env_with(Arc::new(FailingHandler::always("nope")));
    let id = env.seed(pending(&env)).await;

    env.scheduler.run_attempt(id).await;
    assert_eq!(env.scheduler.run_attempt(id).await, AttemptOutcome::Skipped);
    assert_eq!(env.delivery(id).await.attempts, 1);

    env.advance(Duration::from_secs(30));
    assert!(matches!(
        env.scheduler.run_attempt(id).await,
        AttemptOutcome::Rescheduled { attempts: 2, .. }
    ));
}

#[tokio::test]
async fn in_flight_delivery_is_not_claimed_twice() {
    let handler = RecordingHandler::new();
    let env = env_with(Arc::new(handler.clone()));
    let delivery = DeliveryBuilder::new()
        .created_at(env.clock.now_utc())
        .state(DeliveryStatus::Processing, 1)
        .build();
    let id = env.seed(delivery).await;

    assert_eq!(env.scheduler.run_attempt(id).await, AttemptOutcome::Skipped);
    assert_eq!(env.delivery(id).await.attempts, 1);
    assert_eq!(handler.calls(), 0);
}

#[tokio::test]
async fn persistence_failure_after_handler_success_counts_as_failure() {
    let env = env_with(Arc::new(RecordingHandler::new()));
    let id = env.seed(pending(&env)).await;
    env.store.inject_failure(MockOperation::MarkCompleted, "disk full").await;

    let outcome = env.scheduler.run_attempt(id).await;

    assert!(matches!(outcome, AttemptOutcome::Rescheduled { attempts: 1, .. }));
    let delivery = env.delivery(id).await;
    assert_eq!(delivery.status, DeliveryStatus::Failed);
    assert!(delivery.error_message.is_some_and(|m| m.starts_with("PersistenceError")));
}

#[tokio::test]
async fn vanished_delivery_is_dropped() {
    let handler = RecordingHandler::new();
    let env = env_with(Arc::new(handler.clone()));
    let id = env.seed(pending(&env)).await;
    env.store.remove(id).await;

    assert_eq!(env.scheduler.run_attempt(id).await, AttemptOutcome::Missing);
    assert_eq!(handler.calls(), 0);
}

#[tokio::test]
async fn claim_failure_leaves_delivery_for_sweeper() {
    let env = env_with(Arc::new(RecordingHandler::new()));
    let id = env.seed(pending(&env)).await;
    env.store.inject_failure(MockOperation::BeginAttempt, "connection reset").await;

    assert_eq!(env.scheduler.run_attempt(id).await, AttemptOutcome::Unrecorded);
    let delivery = env.delivery(id).await;
    assert_eq!(delivery.status, DeliveryStatus::Pending);
    assert_eq!(delivery.attempts, 0);
}

#[tokio::test]
async fn unmapped_event_completes_without_handler() {
    let env = TestEnv::with_processor(DeliveryProcessor::new());
    let delivery = DeliveryBuilder::new()
        .created_at(env.clock.now_utc())
        .event(ProviderKind::Generic, "order.placed")
        .build();
    let id = env.seed(delivery).await;

    assert_eq!(env.scheduler.run_attempt(id).await, AttemptOutcome::Completed { attempts: 1 });
}

#[tokio::test]
async fn replay_of_dead_delivery_starts_over() {
    let handler = FailingHandler::times(3, "boom");
    let env = env_with(Arc::new(handler.clone()));
    let id = env.seed(pending(&env)).await;

    env.scheduler.run_attempt(id).await;
    env.drain_queue(10).await;
    assert_eq!(env.delivery(id).await.status, DeliveryStatus::Dead);

    let replayed = env.scheduler.replay(id).await.expect("replay succeeds");
    assert_eq!(replayed.status, DeliveryStatus::Pending);
    assert_eq!(replayed.attempts, 0);
    assert!(replayed.error_message.is_none());
    assert_eq!(env.queue.enqueued(), vec![(id, Duration::ZERO)]);

    let outcomes = env.drain_queue(5).await;
    assert_eq!(outcomes, vec![AttemptOutcome::Completed { attempts: 1 }]);
    assert_eq!(env.store.dead_letter_count().await, 1, "history kept after replay");
}

#[tokio::test]
async fn second_death_after_replay_overwrites_dead_letter() {
    let env = env_with(Arc::new(FailingHandler::always("boom")));
    let id = env.seed(pending(&env)).await;

    env.scheduler.run_attempt(id).await;
    env.drain_queue(10).await;
    let first = env.store.find_dead_letter(id).await.unwrap().expect("first dead letter");

    env.advance(Duration::from_secs(3600));
    env.scheduler.replay(id).await.expect("replay succeeds");
    env.drain_queue(10).await;

    let second = env.store.find_dead_letter(id).await.unwrap().expect("second dead letter");
    assert_eq!(env.store.dead_letter_count().await, 1);
    assert_eq!(second.id, first.id);
    assert!(second.failed_at > first.failed_at);
}

#[tokio::test]
async fn replay_of_unknown_delivery_is_not_found() {
    let env = TestEnv::new();
    let err = env.scheduler.replay(hookcatch_core::DeliveryId::new()).await.unwrap_err();
    assert_eq!(err.kind(), "NotFoundError");
}

#[tokio::test]
async fn abandoned_attempt_is_rescheduled_or_dead_lettered() {
    let env = env_with(Arc::new(RecordingHandler::new()));
    let processing_timeout = Duration::from_secs(300);

    let young = DeliveryBuilder::new()
        .created_at(env.clock.now_utc())
        .state(DeliveryStatus::Processing, 1)
        .build();
    let young_id = env.seed(young.clone()).await;
    let outcome = env.scheduler.recover_abandoned(&young, processing_timeout).await;
    assert_eq!(outcome, AttemptOutcome::Rescheduled { attempts: 1, delay: Duration::from_secs(30) });
    let after = env.delivery(young_id).await;
    assert!(after.error_message.is_some_and(|m| m.starts_with("AbandonedAttemptError")));

    let old = DeliveryBuilder::new()
        .created_at(env.clock.now_utc())
        .state(DeliveryStatus::Processing, 3)
        .build();
    let old_id = env.seed(old.clone()).await;
    let outcome = env.scheduler.recover_abandoned(&old, processing_timeout).await;
    assert_eq!(outcome, AttemptOutcome::DeadLettered { attempts: 3 });
    let dead_letter = env.store.find_dead_letter(old_id).await.unwrap().expect("dead letter");
    assert_eq!(dead_letter.error_class, "AbandonedAttemptError");
}

#[tokio::test]
async fn replay_during_in_flight_attempt_discards_its_outcome() {
    let handler = GatedHandler::failing("downstream unavailable");
    let env = env_with(Arc::new(handler.clone()));
    let delivery = DeliveryBuilder::new()
        .created_at(env.clock.now_utc())
        .state(DeliveryStatus::Failed, 2)
        .build();
    let id = env.seed(delivery).await;

    let scheduler = env.scheduler.clone();
    let stale = tokio::spawn(async move { scheduler.run_attempt(id).await });
    handler.wait_until_entered().await;
    assert_eq!(env.delivery(id).await.attempts, 3);

    env.scheduler.replay(id).await.expect("replay succeeds");
    assert_eq!(env.queue.drain(), vec![(id, Duration::ZERO)]);
    let replayed = env.scheduler.run_attempt(id).await;
    assert_eq!(
        replayed,
        AttemptOutcome::Rescheduled { attempts: 1, delay: Duration::from_secs(30) }
    );

    handler.release();
    let outcome = stale.await.expect("attempt task joins");
    assert_eq!(outcome, AttemptOutcome::Superseded { attempts: 3 });

    let after = env.delivery(id).await;
    assert_eq!(after.status, DeliveryStatus::Failed);
    assert_eq!(after.attempts, 1);
    assert_eq!(env.store.dead_letter_count().await, 0, "revoked attempt cannot dead-letter");
    assert_eq!(env.queue.enqueued(), vec![(id, Duration::from_secs(30))]);
    assert_eq!(handler.calls(), 2);
}

#[tokio::test]
async fn worker_finishing_after_recovery_changes_nothing() {
    let handler = GatedHandler::succeeding();
    let env = env_with(Arc::new(handler.clone()));
    let id = env.seed(pending(&env)).await;
    let processing_timeout = Duration::from_secs(300);

    let scheduler = env.scheduler.clone();
    let stale = tokio::spawn(async move { scheduler.run_attempt(id).await });
    handler.wait_until_entered().await;

    env.advance(Duration::from_secs(301));
    let claimed = env.delivery(id).await;
    assert_eq!(claimed.status, DeliveryStatus::Processing);
    let recovered = env.scheduler.recover_abandoned(&claimed, processing_timeout).await;
    assert_eq!(
        recovered,
        AttemptOutcome::Rescheduled { attempts: 1, delay: Duration::from_secs(30) }
    );

    handler.release();
    let outcome = stale.await.expect("attempt task joins");
    assert_eq!(outcome, AttemptOutcome::Superseded { attempts: 1 });

    let after = env.delivery(id).await;
    assert_eq!(after.status, DeliveryStatus::Failed);
    assert_eq!(after.attempts, 1);
    assert!(after.processed_at.is_none());
    assert!(after.error_message.is_some_and(|m| m.starts_with("AbandonedAttemptError")));
    assert_eq!(env.queue.enqueued(), vec![(id, Duration::from_secs(30))]);
}

#[tokio::test]
async fn failing_worker_after_recovery_writes_no_second_dead_letter() {
    let handler = GatedHandler::failing("slow and broken");
    let env = env_with(Arc::new(handler.clone()));
    let delivery = DeliveryBuilder::new()
        .created_at(env.clock.now_utc())
        .state(DeliveryStatus::Failed, 2)
        .build();
    let id = env.seed(delivery).await;

    let scheduler = env.scheduler.clone();
    let stale = tokio::spawn(async move { scheduler.run_attempt(id).await });
    handler.wait_until_entered().await;

    env.advance(Duration::from_secs(301));
    let claimed = env.delivery(id).await;
    let recovered = env.scheduler.recover_abandoned(&claimed, Duration::from_secs(300)).await;
    assert_eq!(recovered, AttemptOutcome::DeadLettered { attempts: 3 });
    let recorded = env.store.find_dead_letter(id).await.unwrap().expect("dead letter");

    env.advance(Duration::from_secs(5));
    handler.release();
    let outcome = stale.await.expect("attempt task joins");
    assert_eq!(outcome, AttemptOutcome::Superseded { attempts: 3 });

    assert_eq!(env.delivery(id).await.status, DeliveryStatus::Dead);
    assert_eq!(env.store.dead_letter_count().await, 1);
    let after = env.store.find_dead_letter(id).await.unwrap().expect("dead letter");
    assert_eq!(after.error_class, "AbandonedAttemptError");
    assert_eq!(after.failed_at, recorded.failed_at);
    assert!(env.queue.enqueued().is_empty());
}
