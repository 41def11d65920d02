pub mod backoff;
pub mod cache;
pub mod clock;
pub mod codec;
pub mod config;
pub mod error;
pub mod job;
pub mod manager;
pub mod metrics;
pub mod recovery;
pub mod registry;
pub mod store;
pub mod worker;

pub use clock::{DateTimeProvider, SystemClock};
pub use codec::{JsonSerializer, Serializer};
pub use config::Config;
pub use error::{JobError, JobResult};
pub use job::{
    ExceptionInfo, Job, JobFailure, JobId, JobStatus, RequestContext, WorkerId,
};
pub use manager::{JobManager, JobManagerConfig};
pub use metrics::{MetricsSink, MetricsSummary};
pub use recovery::{RecoveryConfig, RecoveryService};
pub use registry::{HandlerRegistry, JobInvoker};
pub use store::{JobStore, InMemoryJobStore, RedisJobStore};
pub use worker::{BackgroundService, JobConsumer, JobProducer, WorkerPoolConfig};

/// Current version of the crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_available() {
        assert!(!VERSION.is_empty());
    }
}
