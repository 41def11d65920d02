//! Counters, histograms, and a point-in-time summary. The Redis-backed sink
//! mirrors the teacher's `jobs::metrics::JobMetrics` (INCR per status,
//! LPUSH for a rolling latency sample); the in-process sink keeps the same
//! shape without an external dependency so the in-memory store's tests
//! don't need Redis.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::debug;

use crate::job::JobStatus;

#[derive(Debug, Clone, Default)]
pub struct MetricsSummary {
    pub job_counts: HashMap<JobStatus, i64>,
    pub average_latency_ms: f64,
    pub total_processed: i64,
}

#[async_trait::async_trait]
pub trait MetricsSink: Send + Sync {
    async fn record_completion(&self, status: JobStatus, duration: Duration);
    async fn summary(&self) -> MetricsSummary;
}

#[derive(Default)]
pub struct InProcessMetrics {
    counts: DashMap<JobStatus, i64>,
    latencies_ms: Mutex<Vec<u64>>,
    total: AtomicI64,
}

impl InProcessMetrics {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl MetricsSink for InProcessMetrics {
    async fn record_completion(&self, status: JobStatus, duration: Duration) {
        *self.counts.entry(status).or_insert(0) += 1;
        self.total.fetch_add(1, Ordering::Relaxed);
        let mut latencies = self.latencies_ms.lock().await;
        latencies.push(duration.as_millis() as u64);
        // Keep the sample bounded; matches the teacher's capped
        // rolling-latency list rather than an unbounded accumulator.
        if latencies.len() > 1000 {
            latencies.remove(0);
        }
        debug!(?status, latency_ms = duration.as_millis(), "recorded job completion");
    }

    async fn summary(&self) -> MetricsSummary {
        let job_counts = self
            .counts
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect();
        let latencies = self.latencies_ms.lock().await;
        let average_latency_ms = if latencies.is_empty() {
            0.0
        } else {
            latencies.iter().sum::<u64>() as f64 / latencies.len() as f64
        };
        MetricsSummary {
            job_counts,
            average_latency_ms,
            total_processed: self.total.load(Ordering::Relaxed),
        }
    }
}

/// Redis-backed sink for multi-process deployments sharing the
/// distributed store.
pub struct RedisMetrics {
    pool: crate::cache::RedisPool,
    key_prefix: String,
}

impl RedisMetrics {
    pub fn new(pool: crate::cache::RedisPool, key_prefix: impl Into<String>) -> Self {
        Self {
            pool,
            key_prefix: key_prefix.into(),
        }
    }

    fn count_key(&self, status: JobStatus) -> String {
        format!("{}:metrics:count:{}", self.key_prefix, status.as_str())
    }

    fn latency_key(&self) -> String {
        format!("{}:metrics:latency_ms", self.key_prefix)
    }
}

#[async_trait::async_trait]
impl MetricsSink for RedisMetrics {
    async fn record_completion(&self, status: JobStatus, duration: Duration) {
        let Ok(mut conn) = self.pool.get().await else {
            return;
        };
        let _ = conn.incr(&self.count_key(status)).await;

        let mut push = redis::cmd("LPUSH");
        push.arg(self.latency_key()).arg(duration.as_millis() as u64);
        let _ = conn.execute(push).await;

        let mut trim = redis::cmd("LTRIM");
        trim.arg(self.latency_key()).arg(0).arg(999);
        let _ = conn.execute(trim).await;
    }

    async fn summary(&self) -> MetricsSummary {
        let Ok(mut conn) = self.pool.get().await else {
            return MetricsSummary::default();
        };

        let mut job_counts = HashMap::new();
        let mut total = 0i64;
        for status in [
            JobStatus::Queued,
            JobStatus::Scheduled,
            JobStatus::InProgress,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Canceled,
        ] {
            let mut cmd = redis::cmd("GET");
            cmd.arg(self.count_key(status));
            let value = conn.execute(cmd).await.ok();
            let count: i64 = value
                .and_then(|v| redis::from_redis_value::<Option<String>>(&v).ok().flatten())
                .and_then(|s| s.parse().ok())
                .unwrap_or(0);
            job_counts.insert(status, count);
            total += count;
        }

        let mut range_cmd = redis::cmd("LRANGE");
        range_cmd.arg(self.latency_key()).arg(0).arg(-1);
        let samples: Vec<u64> = conn
            .execute(range_cmd)
            .await
            .ok()
            .and_then(|v| redis::from_redis_value::<Vec<String>>(&v).ok())
            .map(|strs| strs.into_iter().filter_map(|s| s.parse().ok()).collect())
            .unwrap_or_default();
        let average_latency_ms = if samples.is_empty() {
            0.0
        } else {
            samples.iter().sum::<u64>() as f64 / samples.len() as f64
        };

        MetricsSummary {
            job_counts,
            average_latency_ms,
            total_processed: total,
        }
    }
}

pub type SharedMetrics = Arc<dyn MetricsSink>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_process_summary_tracks_counts_and_latency() {
        let metrics = InProcessMetrics::new();
        metrics.record_completion(JobStatus::Completed, Duration::from_millis(100)).await;
        metrics.record_completion(JobStatus::Completed, Duration::from_millis(200)).await;
        metrics.record_completion(JobStatus::Failed, Duration::from_millis(50)).await;

        let summary = metrics.summary().await;
        assert_eq!(summary.total_processed, 3);
        assert_eq!(summary.job_counts.get(&JobStatus::Completed), Some(&2));
        assert_eq!(summary.job_counts.get(&JobStatus::Failed), Some(&1));
        assert!((summary.average_latency_ms - 116.666).abs() < 1.0);
    }
}
