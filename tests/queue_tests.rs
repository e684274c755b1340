/// Work queue tests: scheduling, retries and back-pressure
mod common;

use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use common::*;
use mos_lead_engine::errors::AppError;
use mos_lead_engine::memory_store::InMemoryLeadStore;
use mos_lead_engine::models::{LeadStatus, RunStatus};
use mos_lead_engine::queue::{QueueSettings, WorkQueue};

fn fast_settings() -> QueueSettings {
    QueueSettings {
        concurrency: 2,
        capacity: 16,
        max_attempts: 3,
        retry_backoff: Duration::from_millis(10),
    }
}

#[tokio::test]
async fn scheduled_run_completes_in_the_background() {
    let store = InMemoryLeadStore::new();
    let lead = create(&store, verified_lead(SAFE_PHONE)).await;
    let pipeline = Arc::new(pipeline(
        &store,
        Arc::new(FakeEnrichment::new(hot_bundle())),
        pattern_registry(),
        Arc::new(CountingDialer::default()),
    ));
    let (queue, _handle) = WorkQueue::start(pipeline, fast_settings());
    let mut outcomes = queue.subscribe();

    queue.enqueue_pipeline(lead.id).unwrap();

    let outcome = timeout(Duration::from_secs(5), outcomes.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome.lead_id, lead.id);
    assert_eq!(outcome.status, RunStatus::Succeeded);
    assert_eq!(store.lead(lead.id).unwrap().status, LeadStatus::Contacted);
}

#[tokio::test]
async fn retryable_failures_are_retried_with_backoff() {
    let store = InMemoryLeadStore::new();
    let lead = create(&store, verified_lead(SAFE_PHONE)).await;
    let pipeline = Arc::new(pipeline(
        &store,
        Arc::new(FlakyEnrichment::new(1)),
        pattern_registry(),
        Arc::new(CountingDialer::default()),
    ));
    let (queue, _handle) = WorkQueue::start(pipeline, fast_settings());
    let mut outcomes = queue.subscribe();

    queue.enqueue_pipeline(lead.id).unwrap();

    let first = timeout(Duration::from_secs(5), outcomes.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.status, RunStatus::Failed);
    assert!(first.retryable);

    let second = timeout(Duration::from_secs(5), outcomes.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.status, RunStatus::Succeeded);
    assert_eq!(store.lead(lead.id).unwrap().status, LeadStatus::Contacted);
}

#[tokio::test]
async fn retries_stop_at_the_attempt_limit() {
    let store = InMemoryLeadStore::new();
    let lead = create(&store, verified_lead(SAFE_PHONE)).await;
    let pipeline = Arc::new(pipeline(
        &store,
        Arc::new(FlakyEnrichment::new(usize::MAX)),
        pattern_registry(),
        Arc::new(CountingDialer::default()),
    ));
    let (queue, _handle) = WorkQueue::start(pipeline, fast_settings());
    let mut outcomes = queue.subscribe();

    queue.enqueue_pipeline(lead.id).unwrap();

    for _ in 0..3 {
        let outcome = timeout(Duration::from_secs(5), outcomes.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.status, RunStatus::Failed);
    }
    assert!(timeout(Duration::from_millis(200), outcomes.recv())
        .await
        .is_err());
    assert_eq!(store.lead(lead.id).unwrap().status, LeadStatus::Verified);
}

#[tokio::test]
async fn full_queue_rejects_new_jobs() {
    let store = InMemoryLeadStore::new();
    let lead = create(&store, verified_lead(SAFE_PHONE)).await;
    let pipeline = Arc::new(pipeline(
        &store,
        Arc::new(BlockingEnrichment::new()),
        pattern_registry(),
        Arc::new(CountingDialer::default()),
    ));
    let (queue, _handle) = WorkQueue::start(
        pipeline,
        QueueSettings {
            concurrency: 1,
            capacity: 1,
            ..fast_settings()
        },
    );

    // One job runs, one waits for a worker, one sits in the channel.
    let mut rejected = None;
    for _ in 0..10 {
        if let Err(e) = queue.enqueue_pipeline(lead.id) {
            rejected = Some(e);
            break;
        }
    }
    assert!(matches!(rejected, Some(AppError::QueueUnavailable(_))));
}
