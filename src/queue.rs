//! Background work queue for pipeline runs.
//!
//! Triggers only enqueue; a dispatcher task pulls jobs and runs them on a
//! bounded worker pool. Retryable failures are put back with linear backoff.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::Config;
use crate::errors::AppError;
use crate::models::{LeadId, RunOutcome, RunStatus};
use crate::pipeline::LeadPipeline;

#[derive(Debug, Clone, PartialEq)]
pub struct QueueSettings {
    pub concurrency: usize,
    pub capacity: usize,
    pub max_attempts: u32,
    /// Delay before retry `n` is `retry_backoff * n`.
    pub retry_backoff: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            concurrency: 4,
            capacity: 1024,
            max_attempts: 3,
            retry_backoff: Duration::from_secs(5),
        }
    }
}

impl From<&Config> for QueueSettings {
    fn from(config: &Config) -> Self {
        Self {
            concurrency: config.worker_concurrency,
            capacity: config.queue_capacity,
            max_attempts: config.pipeline_max_attempts,
            retry_backoff: config.retry_backoff,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Job {
    job_id: Uuid,
    lead_id: LeadId,
    attempt: u32,
}

/// Handle used by triggers. Cheap to clone.
#[derive(Clone)]
pub struct WorkQueue {
    sender: mpsc::Sender<Job>,
    outcomes: broadcast::Sender<RunOutcome>,
}

impl WorkQueue {
    /// Spawns the dispatcher. It stops once every `WorkQueue` handle is dropped
    /// and the backlog has drained.
    pub fn start(pipeline: Arc<LeadPipeline>, settings: QueueSettings) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(settings.capacity.max(1));
        let (outcomes, _) = broadcast::channel(256);

        let dispatcher = Dispatcher {
            pipeline,
            retry: sender.downgrade(),
            outcomes: outcomes.clone(),
            permits: Arc::new(Semaphore::new(settings.concurrency.max(1))),
            settings,
        };
        let handle = tokio::spawn(dispatcher.run(receiver));

        (Self { sender, outcomes }, handle)
    }

    /// Schedules a run for `lead_id` and returns its job id immediately.
    pub fn enqueue_pipeline(&self, lead_id: LeadId) -> Result<Uuid, AppError> {
        let job = Job {
            job_id: Uuid::new_v4(),
            lead_id,
            attempt: 1,
        };
        self.sender.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                tracing::warn!("Work queue full, rejecting lead {}", lead_id);
                AppError::QueueUnavailable("work queue is full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => {
                AppError::QueueUnavailable("work queue is shut down".to_string())
            }
        })?;

        tracing::info!("Pipeline job {} scheduled for lead {}", job.job_id, lead_id);
        Ok(job.job_id)
    }

    /// Every finished attempt is published here, retries included.
    pub fn subscribe(&self) -> broadcast::Receiver<RunOutcome> {
        self.outcomes.subscribe()
    }
}

struct Dispatcher {
    pipeline: Arc<LeadPipeline>,
    retry: mpsc::WeakSender<Job>,
    outcomes: broadcast::Sender<RunOutcome>,
    permits: Arc<Semaphore>,
    settings: QueueSettings,
}

impl Dispatcher {
    async fn run(self, mut receiver: mpsc::Receiver<Job>) {
        tracing::info!(
            "Work queue started ({} workers, capacity {})",
            self.settings.concurrency,
            self.settings.capacity
        );

        while let Some(job) = receiver.recv().await {
            let Ok(permit) = self.permits.clone().acquire_owned().await else {
                break;
            };

            let pipeline = self.pipeline.clone();
            let retry = self.retry.clone();
            let outcomes = self.outcomes.clone();
            let settings = self.settings.clone();

            tokio::spawn(async move {
                tracing::debug!(
                    "Job {} attempt {} for lead {}",
                    job.job_id,
                    job.attempt,
                    job.lead_id
                );
                let outcome = pipeline.run_pipeline(job.lead_id).await;
                drop(permit);

                let retry_job = should_retry(&outcome, job.attempt, settings.max_attempts);
                let _ = outcomes.send(outcome);

                if retry_job {
                    let delay = settings.retry_backoff * job.attempt;
                    tracing::info!(
                        "Retrying lead {} in {:?} (attempt {}/{})",
                        job.lead_id,
                        delay,
                        job.attempt + 1,
                        settings.max_attempts
                    );
                    tokio::time::sleep(delay).await;

                    let next = Job {
                        attempt: job.attempt + 1,
                        ..job
                    };
                    match retry.upgrade() {
                        Some(sender) => {
                            if sender.send(next).await.is_err() {
                                tracing::warn!("Work queue closed, dropping retry for lead {}", job.lead_id);
                            }
                        }
                        None => {
                            tracing::warn!("Work queue closed, dropping retry for lead {}", job.lead_id)
                        }
                    }
                }
            });
        }

        tracing::info!("Work queue stopped");
    }
}

fn should_retry(outcome: &RunOutcome, attempt: u32, max_attempts: u32) -> bool {
    if outcome.status != RunStatus::Failed {
        return false;
    }
    if !outcome.retryable {
        tracing::error!(
            "Lead {} failed permanently: {}",
            outcome.lead_id,
            outcome.error.as_deref().unwrap_or("unknown error")
        );
        return false;
    }
    if attempt >= max_attempts {
        tracing::error!(
            "Lead {} failed after {} attempts, giving up",
            outcome.lead_id,
            attempt
        );
        return false;
    }
    true
}
