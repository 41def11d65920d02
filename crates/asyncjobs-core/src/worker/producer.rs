//! Single long-lived task that polls the store and hands claimed jobs to
//! the bounded queue shared with consumers.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};
use uuid::Uuid;

use crate::job::Job;
use crate::manager::JobManager;
use std::sync::Arc;

pub struct JobProducer {
    manager: Arc<JobManager>,
    worker_id: Uuid,
    tx: mpsc::Sender<Job>,
    polling_interval: Duration,
    error_backoff: Duration,
}

impl JobProducer {
    pub fn new(
        manager: Arc<JobManager>,
        worker_id: Uuid,
        tx: mpsc::Sender<Job>,
        polling_interval: Duration,
        error_backoff: Duration,
    ) -> Self {
        Self {
            manager,
            worker_id,
            tx,
            polling_interval,
            error_backoff,
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        loop {
            if shutdown.is_cancelled() {
                break;
            }
            match self.manager.claim_next_available_job(self.worker_id).await {
                Ok(Some(job)) => {
                    // Blocks on a full queue: this is the backpressure that
                    // throttles claim rate to handler throughput.
                    if self.tx.send(job).await.is_err() {
                        debug!("consumer side closed; producer exiting");
                        break;
                    }
                }
                Ok(None) => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.polling_interval) => {}
                        _ = shutdown.cancelled() => break,
                    }
                }
                Err(e) => {
                    error!(error = %e, "producer store error; backing off");
                    tokio::select! {
                        _ = tokio::time::sleep(self.error_backoff) => {}
                        _ = shutdown.cancelled() => break,
                    }
                }
            }
        }
        debug!("producer stopped");
    }
}
