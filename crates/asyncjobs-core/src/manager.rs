//! Orchestrates submit -> claim -> success/failure and applies the retry
//! policy. The only component that calls into `JobStore` directly from the
//! handler-facing API.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::backoff::RetryBackoff;
use crate::clock::{DateTimeProvider, SystemClock};
use crate::error::JobError;
use crate::job::{Job, JobFailure, JobId, RequestContext, WorkerId};
use crate::metrics::{InProcessMetrics, MetricsSummary, SharedMetrics};
use crate::store::JobStore;

#[derive(Debug, Clone)]
pub struct JobManagerConfig {
    pub default_max_retries: u32,
    pub retry_delay_base_seconds: f64,
}

impl Default for JobManagerConfig {
    fn default() -> Self {
        Self {
            default_max_retries: 3,
            retry_delay_base_seconds: 2.0,
        }
    }
}

pub struct JobManager {
    store: Arc<dyn JobStore>,
    clock: Arc<dyn DateTimeProvider>,
    config: JobManagerConfig,
    backoff: RetryBackoff,
    metrics: SharedMetrics,
}

impl JobManager {
    pub fn new(store: Arc<dyn JobStore>, config: JobManagerConfig) -> Self {
        let backoff = RetryBackoff::new(config.retry_delay_base_seconds);
        Self {
            store,
            clock: Arc::new(SystemClock),
            config,
            backoff,
            metrics: Arc::new(InProcessMetrics::new()),
        }
    }

    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub async fn metrics_summary(&self) -> MetricsSummary {
        self.metrics.summary().await
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Arc<dyn DateTimeProvider>) -> Self {
        self.clock = clock;
        self
    }

    /// Idempotent submission: if `external_id` already has a job, that job
    /// is returned unchanged rather than creating a duplicate.
    pub async fn submit(
        &self,
        name: impl Into<String>,
        payload: Vec<u8>,
        context: RequestContext,
        external_id: Option<JobId>,
    ) -> Result<Job, JobError> {
        let id = external_id.unwrap_or_else(Uuid::new_v4);

        if let Some(existing) = self.store.get_by_id(id).await? {
            return Ok(existing);
        }

        let now = self.clock.now();
        let job = Job::new(id, name, payload, context, self.config.default_max_retries, now);

        match self.store.create(job).await {
            Ok(job) => {
                info!(job_id = %job.id, name = %job.name, "job submitted");
                Ok(job)
            }
            Err(JobError::JobExists(_)) => {
                // Lost a race with a concurrent identical submission.
                self.store
                    .get_by_id(id)
                    .await?
                    .ok_or_else(|| JobError::SubmissionError("job vanished after JOB_EXISTS".into()))
            }
            Err(e) => Err(JobError::SubmissionError(e.to_string())),
        }
    }

    pub async fn claim_next_available_job(&self, worker_id: WorkerId) -> Result<Option<Job>, JobError> {
        self.store.claim_next_job_for_worker(worker_id).await
    }

    pub async fn process_job_success(&self, job_id: JobId, result: Vec<u8>) -> Result<Job, JobError> {
        let job = self
            .store
            .get_by_id(job_id)
            .await?
            .ok_or(JobError::JobNotFound(job_id))?;
        if job.worker_id.is_none() {
            return Err(JobError::JobNotClaimed(job_id));
        }
        let now = self.clock.now();
        let completed = job.complete(result, now)?;
        let completed = self.store.update(completed).await?;
        if let Some(started_at) = completed.started_at {
            let elapsed = (now - started_at).to_std().unwrap_or_default();
            self.metrics.record_completion(completed.status, elapsed).await;
        }
        Ok(completed)
    }

    pub async fn process_job_failure(&self, job_id: JobId, error: JobFailure) -> Result<Job, JobError> {
        let job = self
            .store
            .get_by_id(job_id)
            .await?
            .ok_or(JobError::JobNotFound(job_id))?;
        if job.worker_id.is_none() {
            return Err(JobError::JobNotClaimed(job_id));
        }
        let now = self.clock.now();
        let next_retry_count = job.retry_count + 1;
        let retry_delay = if job.retry_count < job.max_retries {
            Some(self.backoff.delay_until(next_retry_count, now))
        } else {
            None
        };
        let failed = job.fail(error, retry_delay, now)?;
        if failed.status == crate::job::JobStatus::Failed {
            warn!(job_id = %failed.id, "job exhausted retries");
        }
        let failed = self.store.update(failed).await?;
        if failed.status == crate::job::JobStatus::Failed {
            if let Some(started_at) = failed.started_at {
                let elapsed = (now - started_at).to_std().unwrap_or_default();
                self.metrics.record_completion(failed.status, elapsed).await;
            }
        }
        Ok(failed)
    }

    pub async fn get_job_by_id(&self, id: JobId) -> Result<Option<Job>, JobError> {
        self.store.get_by_id(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::store::memory::InMemoryJobStore;
    use chrono::Duration as ChronoDuration;
    use chrono::Utc;

    fn manager() -> JobManager {
        let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
        JobManager::new(store, JobManagerConfig::default())
    }

    #[tokio::test]
    async fn submit_is_idempotent_on_external_id() {
        let manager = manager();
        let id = Uuid::new_v4();
        let a = manager
            .submit("Echo", b"{}".to_vec(), RequestContext::default(), Some(id))
            .await
            .unwrap();
        let b = manager
            .submit("Echo", b"{}".to_vec(), RequestContext::default(), Some(id))
            .await
            .unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.id, id);
    }

    #[tokio::test]
    async fn happy_path_completes_with_zero_retries() {
        let manager = manager();
        let job = manager
            .submit("Echo", br#"{"v":"hi"}"#.to_vec(), RequestContext::default(), None)
            .await
            .unwrap();
        let claimed = manager.claim_next_available_job(Uuid::new_v4()).await.unwrap().unwrap();
        assert_eq!(claimed.id, job.id);

        let completed = manager
            .process_job_success(job.id, br#"{"v":"HI"}"#.to_vec())
            .await
            .unwrap();
        assert_eq!(completed.status, crate::job::JobStatus::Completed);
        assert_eq!(completed.retry_count, 0);
        assert!(completed.completed_at.is_some());
    }

    #[tokio::test]
    async fn failure_within_budget_schedules_backoff_delay() {
        let clock = Arc::new(FixedClock(Utc::now()));
        let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
        let manager = JobManager::new(
            store,
            JobManagerConfig {
                default_max_retries: 3,
                retry_delay_base_seconds: 2.0,
            },
        )
        .with_clock(clock.clone());

        let job = manager
            .submit("Echo", b"{}".to_vec(), RequestContext::default(), None)
            .await
            .unwrap();
        manager.claim_next_available_job(Uuid::new_v4()).await.unwrap();

        let failed = manager
            .process_job_failure(job.id, JobFailure::new("BOOM", "nope"))
            .await
            .unwrap();
        assert_eq!(failed.status, crate::job::JobStatus::Scheduled);
        assert_eq!(failed.retry_count, 1);
        let offset = failed.retry_delay_until.unwrap() - clock.0;
        assert_eq!(offset, ChronoDuration::seconds(2));
    }

    #[tokio::test]
    async fn max_retries_zero_fails_on_first_failure() {
        let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
        let manager = JobManager::new(
            store,
            JobManagerConfig {
                default_max_retries: 0,
                retry_delay_base_seconds: 2.0,
            },
        );
        let job = manager
            .submit("Echo", b"{}".to_vec(), RequestContext::default(), None)
            .await
            .unwrap();
        manager.claim_next_available_job(Uuid::new_v4()).await.unwrap();
        let failed = manager
            .process_job_failure(job.id, JobFailure::new("BOOM", "nope"))
            .await
            .unwrap();
        assert_eq!(failed.status, crate::job::JobStatus::Failed);
    }

    #[tokio::test]
    async fn process_success_on_unclaimed_job_is_rejected() {
        let manager = manager();
        let job = manager
            .submit("Echo", b"{}".to_vec(), RequestContext::default(), None)
            .await
            .unwrap();
        let err = manager.process_job_success(job.id, b"ok".to_vec()).await.unwrap_err();
        assert_eq!(err.code(), "JOB_NOT_CLAIMED");
    }
}
