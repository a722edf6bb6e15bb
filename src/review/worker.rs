// SPDX-License-Identifier: MIT
//! In-process job queue and the bounded retry loop.
//!
//! One mpsc channel feeds a worker task that spawns a task per job, so
//! reviews for different pull requests run concurrently and backoff sleeps
//! never block the queue. Each job owns one session row for
//! its whole retry budget: a failed attempt marks the row failed, bumps the
//! retry counter, waits out the backoff delay, and reopens the same row.
//! Non-retryable errors and an exhausted budget end the job with the row left
//! failed.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info, warn};

use crate::error::ReviewError;
use crate::retry::RetryConfig;
use crate::review::model::SessionContext;
use crate::review::orchestrator::Orchestrator;
use crate::review::ReviewJob;
use crate::storage::Storage;

const QUEUE_CAPACITY: usize = 256;

/// Seam between the worker loop and the pipeline, so the retry behavior is
/// testable without network clients.
#[async_trait]
pub trait ReviewRunner: Send + Sync {
    async fn run_attempt(&self, job: &ReviewJob, session_id: &str) -> Result<(), ReviewError>;
}

#[async_trait]
impl ReviewRunner for Orchestrator {
    async fn run_attempt(&self, job: &ReviewJob, session_id: &str) -> Result<(), ReviewError> {
        Orchestrator::run_attempt(self, job, session_id).await
    }
}

#[derive(Clone)]
pub struct ReviewQueue {
    tx: mpsc::Sender<ReviewJob>,
}

impl ReviewQueue {
    /// Enqueue without blocking. A full queue is backpressure the webhook
    /// caller should see.
    pub fn enqueue(&self, job: ReviewJob) -> Result<(), ReviewError> {
        self.tx
            .try_send(job)
            .map_err(|e| ReviewError::ExternalService(format!("review queue full: {e}")))
    }
}

/// Spawn the worker task. Each job runs in its own task so one pull request
/// sleeping out a backoff delay never holds up reviews for others. Returns
/// the queue handle and the join handle; the worker exits once every queue
/// handle is dropped and all in-flight jobs have finished.
pub fn spawn(
    runner: Arc<dyn ReviewRunner>,
    storage: Storage,
    retry: RetryConfig,
) -> (ReviewQueue, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<ReviewJob>(QUEUE_CAPACITY);
    let handle = tokio::spawn(async move {
        let mut jobs = JoinSet::new();
        while let Some(job) = rx.recv().await {
            let runner = runner.clone();
            let storage = storage.clone();
            let retry = retry.clone();
            jobs.spawn(async move {
                process_job(runner.as_ref(), &storage, &retry, job).await;
            });
            // Reap finished jobs as we go so the set does not grow unbounded.
            while jobs.try_join_next().is_some() {}
        }
        while jobs.join_next().await.is_some() {}
        info!("review worker shutting down");
    });
    (ReviewQueue { tx }, handle)
}

/// Drive one job through its full retry budget.
pub async fn process_job(
    runner: &dyn ReviewRunner,
    storage: &Storage,
    retry: &RetryConfig,
    job: ReviewJob,
) {
    let context = SessionContext {
        trigger_action: job.trigger_action.clone(),
        focus_area: job.focus_area.clone(),
        attempt: 1,
    };
    let session = match storage
        .create_session(&job.owner, &job.repo, job.pull_number, job.installation_id, &context)
        .await
    {
        Ok(s) => s,
        Err(e) => {
            error!(owner = %job.owner, repo = %job.repo, pull = job.pull_number, err = %e,
                   "could not create review session");
            return;
        }
    };
    info!(
        session_id = %session.id,
        owner = %job.owner,
        repo = %job.repo,
        pull = job.pull_number,
        action = %job.trigger_action,
        "review job started"
    );

    if let Some(delivery_id) = &job.delivery_id {
        if let Err(e) = storage.mark_event_processed(delivery_id).await {
            warn!(delivery_id, err = %e, "could not flag webhook delivery");
        }
    }

    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match runner.run_attempt(&job, &session.id).await {
            Ok(()) => {
                if attempt > 1 {
                    info!(session_id = %session.id, attempt, "review succeeded after retry");
                }
                return;
            }
            Err(e) => {
                let details = json!({
                    "attempt": attempt,
                    "retry_count": attempt - 1,
                    "action": job.trigger_action,
                    "focus_area": job.focus_area,
                });
                if let Err(db_err) = storage
                    .fail_session(&session.id, &e.to_string(), Some(&details))
                    .await
                {
                    error!(session_id = %session.id, err = %db_err, "could not record failure");
                }

                if !e.is_retryable() {
                    error!(session_id = %session.id, err = %e, "non-retryable failure — giving up");
                    return;
                }
                if attempt >= retry.max_attempts {
                    error!(
                        session_id = %session.id,
                        attempts = attempt,
                        err = %e,
                        "review failed permanently — retry budget exhausted"
                    );
                    return;
                }

                let delay = retry.delay_for(attempt);
                warn!(
                    session_id = %session.id,
                    attempt,
                    delay_s = delay.as_secs(),
                    err = %e,
                    "review attempt failed — retrying"
                );
                if let Err(db_err) = storage.increment_retry(&session.id).await {
                    error!(session_id = %session.id, err = %db_err, "could not bump retry counter");
                }
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::review::model::SessionStatus;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio::sync::Barrier;

    /// Scripted runner: fails `failures` times, then succeeds (driving the
    /// session row the way the real pipeline does).
    struct ScriptedRunner {
        storage: Storage,
        failures: u32,
        error: fn() -> ReviewError,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ReviewRunner for ScriptedRunner {
        async fn run_attempt(&self, _job: &ReviewJob, session_id: &str) -> Result<(), ReviewError> {
            self.storage.mark_in_progress(session_id).await?;
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.failures {
                return Err((self.error)());
            }
            self.storage.finish_session(session_id, 0.5).await?;
            Ok(())
        }
    }

    fn job() -> ReviewJob {
        ReviewJob {
            owner: "acme".into(),
            repo: "widget".into(),
            pull_number: 7,
            installation_id: 42,
            trigger_action: "opened".into(),
            focus_area: None,
            delivery_id: None,
        }
    }

    async fn latest_status(storage: &Storage) -> (SessionStatus, i64) {
        let s = storage
            .latest_session_for_pr("acme", "widget", 7)
            .await
            .unwrap()
            .unwrap();
        (s.status, s.retry_count)
    }

    #[tokio::test]
    async fn transient_failure_is_retried_to_success() {
        let storage = Storage::in_memory().await.unwrap();
        let runner = ScriptedRunner {
            storage: storage.clone(),
            failures: 2,
            error: || ReviewError::ExternalService("flaky upstream".into()),
            calls: AtomicU32::new(0),
        };
        process_job(&runner, &storage, &RetryConfig::instant(), job()).await;

        assert_eq!(runner.calls.load(Ordering::SeqCst), 3);
        let (status, retries) = latest_status(&storage).await;
        assert_eq!(status, SessionStatus::Completed);
        assert_eq!(retries, 2);
    }

    #[tokio::test]
    async fn retry_budget_is_bounded() {
        let storage = Storage::in_memory().await.unwrap();
        let runner = ScriptedRunner {
            storage: storage.clone(),
            failures: u32::MAX,
            error: || ReviewError::GitHubApi {
                status: 502,
                body: "bad gateway".into(),
            },
            calls: AtomicU32::new(0),
        };
        process_job(&runner, &storage, &RetryConfig::instant(), job()).await;

        // review_attempts-shaped budget: 4 attempts total.
        assert_eq!(runner.calls.load(Ordering::SeqCst), 4);
        let (status, retries) = latest_status(&storage).await;
        assert_eq!(status, SessionStatus::Failed);
        assert_eq!(retries, 3);
    }

    #[tokio::test]
    async fn authentication_failure_is_not_retried() {
        let storage = Storage::in_memory().await.unwrap();
        let runner = ScriptedRunner {
            storage: storage.clone(),
            failures: u32::MAX,
            error: || ReviewError::Authentication("bad credentials".into()),
            calls: AtomicU32::new(0),
        };
        process_job(&runner, &storage, &RetryConfig::instant(), job()).await;

        assert_eq!(runner.calls.load(Ordering::SeqCst), 1);
        let (status, retries) = latest_status(&storage).await;
        assert_eq!(status, SessionStatus::Failed);
        assert_eq!(retries, 0);
    }

    #[tokio::test]
    async fn failure_details_are_recorded() {
        let storage = Storage::in_memory().await.unwrap();
        let runner = ScriptedRunner {
            storage: storage.clone(),
            failures: u32::MAX,
            error: || ReviewError::AiValidation("missing field `risk`".into()),
            calls: AtomicU32::new(0),
        };
        process_job(&runner, &storage, &RetryConfig::instant(), job()).await;

        let session = storage
            .latest_session_for_pr("acme", "widget", 7)
            .await
            .unwrap()
            .unwrap();
        assert!(session.error_message.unwrap().contains("missing field"));
        let details: serde_json::Value =
            serde_json::from_str(&session.error_details.unwrap()).unwrap();
        assert_eq!(details["action"], "opened");
        assert_eq!(details["attempt"], 4);
    }

    #[tokio::test]
    async fn queued_jobs_flow_through_the_worker() {
        let storage = Storage::in_memory().await.unwrap();
        let runner = Arc::new(ScriptedRunner {
            storage: storage.clone(),
            failures: 0,
            error: || ReviewError::ExternalService("unused".into()),
            calls: AtomicU32::new(0),
        });
        let (queue, handle) = spawn(runner, storage.clone(), RetryConfig::instant());
        queue.enqueue(job()).unwrap();
        drop(queue);
        handle.await.unwrap();

        let (status, _) = latest_status(&storage).await;
        assert_eq!(status, SessionStatus::Completed);
    }

    /// Runner that only completes once two attempts are in flight at the
    /// same time.
    struct RendezvousRunner {
        storage: Storage,
        barrier: Barrier,
    }

    #[async_trait]
    impl ReviewRunner for RendezvousRunner {
        async fn run_attempt(&self, _job: &ReviewJob, session_id: &str) -> Result<(), ReviewError> {
            self.storage.mark_in_progress(session_id).await?;
            self.barrier.wait().await;
            self.storage.finish_session(session_id, 0.1).await?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn jobs_for_different_pulls_run_concurrently() {
        let storage = Storage::in_memory().await.unwrap();
        let runner = Arc::new(RendezvousRunner {
            storage: storage.clone(),
            barrier: Barrier::new(2),
        });
        let (queue, handle) = spawn(runner, storage.clone(), RetryConfig::instant());

        queue.enqueue(job()).unwrap();
        let mut second = job();
        second.pull_number = 8;
        queue.enqueue(second).unwrap();
        drop(queue);

        // If jobs ran one at a time the first would wait at the barrier
        // forever and the worker would never finish.
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("jobs did not run concurrently")
            .unwrap();

        for pull in [7, 8] {
            let s = storage
                .latest_session_for_pr("acme", "widget", pull)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(s.status, SessionStatus::Completed);
        }
    }
}
