//! Integration tests for the review job flow: queueing, the bounded retry
//! loop, and the session rows it leaves behind.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use revd::error::ReviewError;
use revd::retry::RetryConfig;
use revd::review::model::SessionStatus;
use revd::review::worker::{self, ReviewRunner};
use revd::review::ReviewJob;
use revd::storage::Storage;

/// Fails a configurable number of attempts, then completes the session the
/// way the pipeline does.
struct FlakyRunner {
    storage: Storage,
    failures_before_success: u32,
    calls: AtomicU32,
}

#[async_trait]
impl ReviewRunner for FlakyRunner {
    async fn run_attempt(&self, _job: &ReviewJob, session_id: &str) -> Result<(), ReviewError> {
        self.storage.mark_in_progress(session_id).await?;
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= self.failures_before_success {
            return Err(ReviewError::ExternalService("gateway timeout".into()));
        }
        self.storage.finish_session(session_id, 2.0).await?;
        Ok(())
    }
}

fn job(pull_number: u64) -> ReviewJob {
    ReviewJob {
        owner: "acme".to_string(),
        repo: "widget".to_string(),
        pull_number,
        installation_id: 7001,
        trigger_action: "opened".to_string(),
        focus_area: None,
        delivery_id: Some(format!("delivery-{pull_number}")),
    }
}

#[tokio::test]
async fn test_job_retries_transient_failures_then_completes() {
    let storage = Storage::in_memory().await.unwrap();
    let runner = FlakyRunner {
        storage: storage.clone(),
        failures_before_success: 1,
        calls: AtomicU32::new(0),
    };

    worker::process_job(&runner, &storage, &RetryConfig::instant(), job(50)).await;

    let session = storage
        .latest_session_for_pr("acme", "widget", 50)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.retry_count, 1);
    assert_eq!(runner.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_exhausted_retries_leave_a_failed_session() {
    let storage = Storage::in_memory().await.unwrap();
    let runner = FlakyRunner {
        storage: storage.clone(),
        failures_before_success: u32::MAX,
        calls: AtomicU32::new(0),
    };
    let config = RetryConfig::instant();

    worker::process_job(&runner, &storage, &config, job(51)).await;

    let session = storage
        .latest_session_for_pr("acme", "widget", 51)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.status, SessionStatus::Failed);
    assert_eq!(runner.calls.load(Ordering::SeqCst), config.max_attempts);
    assert_eq!(session.retry_count as u32, config.max_attempts - 1);
    assert!(session.error_message.unwrap().contains("gateway timeout"));
}

#[tokio::test]
async fn test_delivery_is_flagged_processed_when_job_runs() {
    let storage = Storage::in_memory().await.unwrap();
    let fresh = storage
        .record_webhook_event("pull_request", "opened", "delivery-52", "acme", "widget", 52)
        .await
        .unwrap();
    assert!(fresh);

    let runner = FlakyRunner {
        storage: storage.clone(),
        failures_before_success: 0,
        calls: AtomicU32::new(0),
    };
    worker::process_job(&runner, &storage, &RetryConfig::instant(), job(52)).await;

    // The same delivery GUID re-sent later is still a duplicate.
    let dup = storage
        .record_webhook_event("pull_request", "opened", "delivery-52", "acme", "widget", 52)
        .await
        .unwrap();
    assert!(!dup);
}

#[tokio::test]
async fn test_spawned_worker_drains_the_queue() {
    let storage = Storage::in_memory().await.unwrap();
    let runner = Arc::new(FlakyRunner {
        storage: storage.clone(),
        failures_before_success: 0,
        calls: AtomicU32::new(0),
    });

    let (queue, handle) = worker::spawn(runner, storage.clone(), RetryConfig::instant());
    queue.enqueue(job(53)).unwrap();
    queue.enqueue(job(54)).unwrap();
    drop(queue);
    handle.await.unwrap();

    for pull in [53, 54] {
        let session = storage
            .latest_session_for_pr("acme", "widget", pull)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.status, SessionStatus::Completed, "pull #{pull}");
    }
}
