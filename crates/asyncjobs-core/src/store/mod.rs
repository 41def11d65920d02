//! The `JobStore` contract and its two implementations.

pub mod memory;
pub mod redis_store;

use chrono::{DateTime, Utc};

use crate::error::JobError;
use crate::job::{Job, JobId, WorkerId};

pub use memory::InMemoryJobStore;
pub use redis_store::RedisJobStore;

/// Every operation carries no cancellation type of its own here — callers
/// wrap store calls in `tokio::select!`/`tokio::time::timeout` at the call
/// site, matching the teacher's use of `tokio::time::timeout` around
/// handler execution rather than threading a token through every trait.
#[async_trait::async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, job: Job) -> Result<Job, JobError>;

    async fn get_by_id(&self, id: JobId) -> Result<Option<Job>, JobError>;

    /// Refreshes `last_updated_at` and re-indexes ready-set membership.
    async fn update(&self, job: Job) -> Result<Job, JobError>;

    /// Atomically claims the oldest eligible job for `worker_id`, or
    /// returns `None` if nothing is claimable or a concurrent claim won.
    async fn claim_next_job_for_worker(&self, worker_id: WorkerId) -> Result<Option<Job>, JobError>;

    /// Whether this store can be scanned by `RecoveryService`.
    fn supports_recovery(&self) -> bool;

    /// Ids of jobs `InProgress` since before `older_than`, for the
    /// recovery scan. Stores that don't support recovery return `Ok(vec![])`.
    async fn find_stale_in_progress(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<JobId>, JobError>;

    /// Atomically verifies `id` is still `InProgress` and stale, then
    /// reschedules (`Scheduled`, retry incremented) or fails it
    /// (`RetryCount = MaxRetries`). Returns `None` if the job had already
    /// moved on (recovered by another process, or completed).
    async fn reclaim_stale_job(
        &self,
        id: JobId,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        retry_delay: Option<DateTime<Utc>>,
    ) -> Result<Option<Job>, JobError>;
}
