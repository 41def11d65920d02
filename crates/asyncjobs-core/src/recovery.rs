//! Periodically reclaims jobs abandoned by dead workers. Runs only against
//! stores that advertise `SupportsRecovery=true`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::backoff::RetryBackoff;
use crate::store::JobStore;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RecoveryConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_job_timeout_minutes")]
    pub job_timeout_minutes: i64,
    #[serde(default = "default_check_interval")]
    pub recovery_check_interval_seconds: u64,
    #[serde(default = "default_retry_base")]
    pub retry_delay_base_seconds: f64,
    #[serde(default = "default_batch_size")]
    pub scan_batch_size: usize,
}

fn default_enabled() -> bool {
    true
}
fn default_job_timeout_minutes() -> i64 {
    15
}
fn default_check_interval() -> u64 {
    60
}
fn default_retry_base() -> f64 {
    2.0
}
fn default_batch_size() -> usize {
    100
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            job_timeout_minutes: 15,
            recovery_check_interval_seconds: 60,
            retry_delay_base_seconds: 2.0,
            scan_batch_size: 100,
        }
    }
}

impl RecoveryConfig {
    /// The spec only requires `interval <= timeout * 60 / 2` for timely
    /// recovery; it does not enforce it. We warn instead of failing.
    pub fn check_interval_is_timely(&self) -> bool {
        (self.recovery_check_interval_seconds as i64) <= (self.job_timeout_minutes * 60) / 2
    }
}

pub struct RecoveryService {
    store: Arc<dyn JobStore>,
    config: RecoveryConfig,
    backoff: RetryBackoff,
}

impl RecoveryService {
    pub fn new(store: Arc<dyn JobStore>, config: RecoveryConfig) -> Self {
        if !config.check_interval_is_timely() {
            warn!(
                interval_seconds = config.recovery_check_interval_seconds,
                timeout_minutes = config.job_timeout_minutes,
                "recovery check interval is not timely relative to job timeout"
            );
        }
        let backoff = RetryBackoff::new(config.retry_delay_base_seconds);
        Self { store, config, backoff }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        if !self.config.enabled || !self.store.supports_recovery() {
            info!("recovery service disabled or store does not support recovery");
            return;
        }

        let interval = Duration::from_secs(self.config.recovery_check_interval_seconds);
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.cancelled() => break,
            }
            if let Err(e) = self.sweep().await {
                warn!(error = %e, "recovery sweep failed");
            }
        }
    }

    /// A single pass; exposed separately so tests can drive it without a
    /// live interval loop.
    pub async fn sweep(&self) -> Result<usize, crate::error::JobError> {
        let now = Utc::now();
        let stale_before = now - chrono::Duration::minutes(self.config.job_timeout_minutes);

        let stale_ids = self
            .store
            .find_stale_in_progress(stale_before, self.config.scan_batch_size)
            .await?;

        let mut reclaimed = 0;
        for id in stale_ids {
            let job = match self.store.get_by_id(id).await? {
                Some(job) => job,
                None => continue,
            };
            let retry_delay = if job.retry_count < job.max_retries {
                Some(self.backoff.delay_until(job.retry_count + 1, now))
            } else {
                None
            };
            if self
                .store
                .reclaim_stale_job(id, now, stale_before, retry_delay)
                .await?
                .is_some()
            {
                reclaimed += 1;
            }
        }
        Ok(reclaimed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobStatus, RequestContext};
    use crate::store::memory::InMemoryJobStore;
    use uuid::Uuid;

    #[tokio::test]
    async fn reschedules_stuck_job_within_retry_budget() {
        let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
        let job = crate::job::Job::new(Uuid::new_v4(), "Echo", b"{}".to_vec(), RequestContext::default(), 3, Utc::now());
        store.create(job.clone()).await.unwrap();
        store.claim_next_job_for_worker(Uuid::new_v4()).await.unwrap();

        let recovery = RecoveryService::new(
            store.clone(),
            RecoveryConfig {
                job_timeout_minutes: 0,
                ..RecoveryConfig::default()
            },
        );
        // job_timeout_minutes=0 means "stale_before == now", and the job
        // was started strictly before this sweep's `now`.
        tokio::time::sleep(Duration::from_millis(5)).await;
        let count = recovery.sweep().await.unwrap();
        assert_eq!(count, 1);

        let reloaded = store.get_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, JobStatus::Scheduled);
        assert_eq!(reloaded.retry_count, 1);
    }

    #[tokio::test]
    async fn recovery_is_idempotent() {
        let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
        let job = crate::job::Job::new(Uuid::new_v4(), "Echo", b"{}".to_vec(), RequestContext::default(), 0, Utc::now());
        store.create(job.clone()).await.unwrap();
        store.claim_next_job_for_worker(Uuid::new_v4()).await.unwrap();

        let recovery = RecoveryService::new(
            store.clone(),
            RecoveryConfig {
                job_timeout_minutes: 0,
                ..RecoveryConfig::default()
            },
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
        let first = recovery.sweep().await.unwrap();
        let second = recovery.sweep().await.unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, 0); // already Failed, no longer InProgress/stale

        let reloaded = store.get_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, JobStatus::Failed);
        assert_eq!(reloaded.error.unwrap().code, "JOB_TIMEOUT");
    }
}
