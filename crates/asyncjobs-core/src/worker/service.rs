//! Owns the producer, the consumer pool, the bounded queue, and graceful
//! shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

use crate::manager::JobManager;
use crate::registry::HandlerRegistry;

use super::consumer::JobConsumer;
use super::producer::JobProducer;

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub maximum_concurrency: usize,
    pub maximum_queue_size: usize,
    pub polling_interval_ms: u64,
    pub error_backoff_ms: u64,
    pub job_timeout_minutes: u64,
    pub shutdown_grace_seconds: u64,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            maximum_concurrency: 4,
            maximum_queue_size: 100,
            polling_interval_ms: 500,
            error_backoff_ms: 2000,
            job_timeout_minutes: 5,
            shutdown_grace_seconds: 30,
        }
    }
}

pub struct BackgroundService {
    shutdown: CancellationToken,
    semaphore: Arc<Semaphore>,
    maximum_concurrency: usize,
    shutdown_grace: Duration,
    producer_handle: Option<JoinHandle<()>>,
    consumer_handles: Vec<JoinHandle<()>>,
}

impl BackgroundService {
    pub fn start(manager: Arc<JobManager>, registry: Arc<HandlerRegistry>, config: WorkerPoolConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.maximum_queue_size);
        let rx = Arc::new(Mutex::new(rx));
        let semaphore = Arc::new(Semaphore::new(config.maximum_concurrency));
        let shutdown = CancellationToken::new();
        let worker_id = Uuid::new_v4();

        let producer = JobProducer::new(
            manager.clone(),
            worker_id,
            tx,
            Duration::from_millis(config.polling_interval_ms),
            Duration::from_millis(config.error_backoff_ms),
        );
        let producer_handle = tokio::spawn(producer.run(shutdown.clone()));

        let job_timeout = Duration::from_secs(config.job_timeout_minutes * 60);
        let consumer_handles = (0..config.maximum_concurrency)
            .map(|_| {
                let consumer = JobConsumer::new(
                    manager.clone(),
                    registry.clone(),
                    rx.clone(),
                    semaphore.clone(),
                    job_timeout,
                );
                tokio::spawn(consumer.run(shutdown.clone()))
            })
            .collect();

        Self {
            shutdown,
            semaphore,
            maximum_concurrency: config.maximum_concurrency,
            shutdown_grace: Duration::from_secs(config.shutdown_grace_seconds),
            producer_handle: Some(producer_handle),
            consumer_handles,
        }
    }

    /// Triggers shutdown, closes the queue writer, and waits for in-flight
    /// work to drain up to the configured grace deadline.
    pub async fn stop(mut self) {
        self.shutdown.cancel();

        if let Some(handle) = self.producer_handle.take() {
            let _ = handle.await;
        }
        for handle in self.consumer_handles.drain(..) {
            let _ = handle.await;
        }

        let wait_for_drain = self.semaphore.acquire_many(self.maximum_concurrency as u32);
        if tokio::time::timeout(self.shutdown_grace, wait_for_drain).await.is_err() {
            warn!(
                grace_seconds = self.shutdown_grace.as_secs(),
                "shutdown grace deadline exceeded with in-flight jobs still running"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::RequestContext;
    use crate::manager::JobManagerConfig;
    use crate::store::memory::InMemoryJobStore;

    #[tokio::test]
    async fn processes_submitted_job_end_to_end() {
        let store: Arc<dyn crate::store::JobStore> = Arc::new(InMemoryJobStore::new());
        let manager = Arc::new(JobManager::new(store, JobManagerConfig::default()));

        let mut registry = HandlerRegistry::new();
        registry.register("Echo", |p: serde_json::Value, _ctx| async move { Ok(p) });
        let registry = Arc::new(registry);

        let job = manager
            .submit("Echo", br#"{"v":"hi"}"#.to_vec(), RequestContext::default(), None)
            .await
            .unwrap();

        let service = BackgroundService::start(
            manager.clone(),
            registry,
            WorkerPoolConfig {
                maximum_concurrency: 2,
                maximum_queue_size: 8,
                polling_interval_ms: 10,
                error_backoff_ms: 50,
                job_timeout_minutes: 1,
                shutdown_grace_seconds: 5,
            },
        );

        let mut completed = None;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if let Some(found) = manager.get_job_by_id(job.id).await.unwrap() {
                if found.status.is_terminal() {
                    completed = Some(found);
                    break;
                }
            }
        }
        service.stop().await;

        let completed = completed.expect("job should complete within test budget");
        assert_eq!(completed.status, crate::job::JobStatus::Completed);
    }

    #[tokio::test]
    async fn unknown_handler_fails_job_with_stable_code() {
        let store: Arc<dyn crate::store::JobStore> = Arc::new(InMemoryJobStore::new());
        let manager = Arc::new(JobManager::new(
            store,
            JobManagerConfig {
                default_max_retries: 0,
                retry_delay_base_seconds: 2.0,
            },
        ));
        let registry = Arc::new(HandlerRegistry::new());

        let job = manager
            .submit("Missing", b"{}".to_vec(), RequestContext::default(), None)
            .await
            .unwrap();

        let service = BackgroundService::start(
            manager.clone(),
            registry,
            WorkerPoolConfig {
                maximum_concurrency: 1,
                maximum_queue_size: 4,
                polling_interval_ms: 10,
                error_backoff_ms: 50,
                job_timeout_minutes: 1,
                shutdown_grace_seconds: 5,
            },
        );

        let mut failed = None;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if let Some(found) = manager.get_job_by_id(job.id).await.unwrap() {
                if found.status.is_terminal() {
                    failed = Some(found);
                    break;
                }
            }
        }
        service.stop().await;

        let failed = failed.expect("job should reach a terminal state");
        assert_eq!(failed.status, crate::job::JobStatus::Failed);
        assert_eq!(failed.error.unwrap().code, "HANDLER_NOT_REGISTERED");
    }

    // Guards against the consumer loop busy-looping on an empty queue;
    // if it did, this test would spin the executor and time out.
    #[tokio::test]
    async fn idle_pool_does_not_busy_loop() {
        let store: Arc<dyn crate::store::JobStore> = Arc::new(InMemoryJobStore::new());
        let manager = Arc::new(JobManager::new(store, JobManagerConfig::default()));
        let registry = Arc::new(HandlerRegistry::new());

        let service = BackgroundService::start(
            manager,
            registry,
            WorkerPoolConfig {
                maximum_concurrency: 1,
                maximum_queue_size: 4,
                polling_interval_ms: 20,
                error_backoff_ms: 50,
                job_timeout_minutes: 1,
                shutdown_grace_seconds: 1,
            },
        );
        tokio::time::sleep(Duration::from_millis(60)).await;
        service.stop().await;
    }
}
