//! Single-process, `DashMap`-backed `JobStore`. Ordering is maintained
//! implicitly by scanning — acceptable for the development target the
//! in-memory store serves. At-most-one-claim is guaranteed by
//! process-local mutual exclusion around the claim critical section.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::error::JobError;
use crate::job::{Job, JobId, JobStatus, WorkerId};

use super::JobStore;

#[derive(Clone, Default)]
pub struct InMemoryJobStore {
    jobs: Arc<DashMap<JobId, Job>>,
    claim_lock: Arc<Mutex<()>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, job: Job) -> Result<Job, JobError> {
        if self.jobs.contains_key(&job.id) {
            return Err(JobError::JobExists(job.id));
        }
        self.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get_by_id(&self, id: JobId) -> Result<Option<Job>, JobError> {
        Ok(self.jobs.get(&id).map(|entry| entry.value().clone()))
    }

    async fn update(&self, mut job: Job) -> Result<Job, JobError> {
        let now = Utc::now();
        job.last_updated_at = now;
        let mut entry = self
            .jobs
            .get_mut(&job.id)
            .ok_or(JobError::JobNotFound(job.id))?;
        *entry = job.clone();
        Ok(job)
    }

    async fn claim_next_job_for_worker(&self, worker_id: WorkerId) -> Result<Option<Job>, JobError> {
        let _guard = self.claim_lock.lock().await;
        let now = Utc::now();

        let candidate = self
            .jobs
            .iter()
            .filter(|entry| entry.value().is_ready(now))
            .min_by(|a, b| {
                a.value()
                    .queue_score()
                    .partial_cmp(&b.value().queue_score())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|entry| entry.key().clone());

        let Some(id) = candidate else {
            return Ok(None);
        };

        let mut entry = self.jobs.get_mut(&id).ok_or(JobError::JobNotFound(id))?;
        if !entry.is_ready(now) {
            // Lost a race against another task holding the same lock
            // elsewhere in-process; shouldn't happen given the mutex, but
            // re-check defensively since `is_ready` depends on wall time.
            return Ok(None);
        }
        let claimed = entry.claim(worker_id, now)?;
        *entry = claimed.clone();
        Ok(Some(claimed))
    }

    fn supports_recovery(&self) -> bool {
        true
    }

    async fn find_stale_in_progress(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<JobId>, JobError> {
        let stale = self
            .jobs
            .iter()
            .filter(|entry| {
                let job = entry.value();
                job.status == JobStatus::InProgress
                    && job.started_at.map_or(true, |t| t <= older_than)
            })
            .map(|entry| entry.key().clone())
            .take(limit)
            .collect();
        Ok(stale)
    }

    async fn reclaim_stale_job(
        &self,
        id: JobId,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        retry_delay: Option<DateTime<Utc>>,
    ) -> Result<Option<Job>, JobError> {
        let _guard = self.claim_lock.lock().await;
        let mut entry = match self.jobs.get_mut(&id) {
            Some(e) => e,
            None => return Ok(None),
        };
        if entry.status != JobStatus::InProgress
            || entry.started_at.map_or(false, |t| t > stale_before)
        {
            return Ok(None);
        }
        let error = crate::job::JobFailure::new("JOB_TIMEOUT", "job timed out while in progress");
        let reclaimed = entry.fail(error, retry_delay, now)?;
        *entry = reclaimed.clone();
        Ok(Some(reclaimed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::RequestContext;
    use uuid::Uuid;

    fn job(now: DateTime<Utc>) -> Job {
        Job::new(Uuid::new_v4(), "Echo", b"{}".to_vec(), RequestContext::default(), 3, now)
    }

    #[tokio::test]
    async fn create_rejects_duplicate_id() {
        let store = InMemoryJobStore::new();
        let j = job(Utc::now());
        store.create(j.clone()).await.unwrap();
        let err = store.create(j).await.unwrap_err();
        assert_eq!(err.code(), "JOB_EXISTS");
    }

    #[tokio::test]
    async fn claim_returns_none_when_empty() {
        let store = InMemoryJobStore::new();
        assert!(store.claim_next_job_for_worker(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_picks_oldest_ready_job_fifo() {
        let store = InMemoryJobStore::new();
        let now = Utc::now();
        let first = job(now);
        let second = job(now + chrono::Duration::seconds(1));
        store.create(second.clone()).await.unwrap();
        store.create(first.clone()).await.unwrap();

        let claimed = store.claim_next_job_for_worker(Uuid::new_v4()).await.unwrap().unwrap();
        assert_eq!(claimed.id, first.id);
    }

    #[tokio::test]
    async fn only_one_worker_can_claim_the_same_job() {
        let store = InMemoryJobStore::new();
        let j = job(Utc::now());
        store.create(j.clone()).await.unwrap();

        let a = store.claim_next_job_for_worker(Uuid::new_v4()).await.unwrap();
        let b = store.claim_next_job_for_worker(Uuid::new_v4()).await.unwrap();
        assert!(a.is_some());
        assert!(b.is_none());
    }

    #[tokio::test]
    async fn update_refreshes_last_updated_at() {
        let store = InMemoryJobStore::new();
        let now = Utc::now();
        let j = job(now);
        store.create(j.clone()).await.unwrap();
        let updated = store.update(j).await.unwrap();
        assert!(updated.last_updated_at >= now);
    }

    #[tokio::test]
    async fn find_stale_in_progress_only_returns_timed_out_jobs() {
        let store = InMemoryJobStore::new();
        let now = Utc::now();
        let j = job(now);
        store.create(j.clone()).await.unwrap();
        let claimed = store.claim_next_job_for_worker(Uuid::new_v4()).await.unwrap().unwrap();

        let none_stale = store.find_stale_in_progress(now - chrono::Duration::seconds(10), 10).await.unwrap();
        assert!(none_stale.is_empty());

        let stale = store
            .find_stale_in_progress(claimed.started_at.unwrap() + chrono::Duration::seconds(1), 10)
            .await
            .unwrap();
        assert_eq!(stale, vec![claimed.id]);
    }
}
