//! N long-lived tasks that read from the bounded queue, acquire a permit
//! from the shared concurrency semaphore, and execute the handler.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::job::{Job, JobFailure};
use crate::manager::JobManager;
use crate::registry::HandlerRegistry;

pub struct JobConsumer {
    manager: Arc<JobManager>,
    registry: Arc<HandlerRegistry>,
    rx: Arc<Mutex<mpsc::Receiver<Job>>>,
    semaphore: Arc<Semaphore>,
    job_timeout: Duration,
}

impl JobConsumer {
    pub fn new(
        manager: Arc<JobManager>,
        registry: Arc<HandlerRegistry>,
        rx: Arc<Mutex<mpsc::Receiver<Job>>>,
        semaphore: Arc<Semaphore>,
        job_timeout: Duration,
    ) -> Self {
        Self {
            manager,
            registry,
            rx,
            semaphore,
            job_timeout,
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        loop {
            let job = {
                let mut rx = self.rx.lock().await;
                tokio::select! {
                    job = rx.recv() => job,
                    _ = shutdown.cancelled() => None,
                }
            };
            let Some(job) = job else {
                break;
            };

            let permit = match self.semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            let manager = self.manager.clone();
            let registry = self.registry.clone();
            let timeout = self.job_timeout;
            let job_shutdown = shutdown.clone();
            tokio::spawn(async move {
                let _permit = permit;
                Self::execute(manager, registry, job, timeout, job_shutdown).await;
            });
        }
        debug!("consumer stopped accepting new work");
    }

    async fn execute(
        manager: Arc<JobManager>,
        registry: Arc<HandlerRegistry>,
        job: Job,
        timeout: Duration,
        shutdown: CancellationToken,
    ) {
        let Some(invoker) = registry.get(&job.name) else {
            let _ = manager
                .process_job_failure(
                    job.id,
                    JobFailure::new("HANDLER_NOT_REGISTERED", format!("no handler registered for {}", job.name)),
                )
                .await;
            return;
        };

        let outcome = tokio::select! {
            res = tokio::time::timeout(timeout, invoker.invoke(&job.payload, &job.context)) => {
                match res {
                    Ok(Ok(bytes)) => Ok(bytes),
                    Ok(Err(failure)) => Err(failure),
                    Err(_elapsed) => Err(JobFailure::new(
                        "JOB_TIMEOUT",
                        format!("job exceeded {:?} timeout", timeout),
                    )),
                }
            }
            _ = shutdown.cancelled() => Err(JobFailure::new(
                "JOB_TIMEOUT",
                "in-flight job cancelled by shutdown",
            )),
        };

        match outcome {
            Ok(result) => {
                if let Err(e) = manager.process_job_success(job.id, result).await {
                    error!(job_id = %job.id, error = %e, "failed to record job success");
                }
                info!(job_id = %job.id, name = %job.name, "job completed");
            }
            Err(failure) => {
                if let Err(e) = manager.process_job_failure(job.id, failure).await {
                    error!(job_id = %job.id, error = %e, "failed to record job failure");
                }
            }
        }
    }
}
