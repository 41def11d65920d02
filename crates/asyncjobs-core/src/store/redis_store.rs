//! Distributed `JobStore`: a hash per job (`ae:job:{id}`) plus a ready-set
//! sorted set (`ae:jobs:queue`) and an in-progress index (`ae:jobs:inprogress`)
//! used by the recovery scan. Claim and recovery-reclaim are both realized
//! as server-side Lua scripts so at-most-one-winner holds across processes —
//! the teacher's own `jobs::queue` issues separate RPOP/GET/SET calls with
//! no such guarantee, so this piece follows general `redis-rs` scripting
//! idiom instead of a literal teacher precedent (see DESIGN.md).

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use tracing::{debug, warn};

use crate::cache::RedisPool;
use crate::error::JobError;
use crate::job::{Job, JobId, JobStatus, WorkerId};

use super::JobStore;

fn job_key(prefix: &str, id: JobId) -> String {
    format!("{prefix}:job:{id}")
}

fn queue_key(prefix: &str) -> String {
    format!("{prefix}:jobs:queue")
}

fn inprogress_key(prefix: &str) -> String {
    format!("{prefix}:jobs:inprogress")
}

static CREATE_SCRIPT: Lazy<redis::Script> = Lazy::new(|| {
    redis::Script::new(
        r#"
        if redis.call('EXISTS', KEYS[1]) == 1 then
            return 0
        end
        redis.call('HSET', KEYS[1], 'data', ARGV[1], 'status', ARGV[2],
            'worker_id', ARGV[3], 'retry_delay_score', ARGV[4])
        if ARGV[5] == '1' then
            redis.call('ZADD', KEYS[2], ARGV[6], ARGV[7])
        end
        return 1
        "#,
    )
});

static CLAIM_SCRIPT: Lazy<redis::Script> = Lazy::new(|| {
    redis::Script::new(
        r#"
        local job_key = KEYS[1]
        local queue_key = KEYS[2]
        local inprogress_key = KEYS[3]
        local worker_id = ARGV[1]
        local now_iso = ARGV[2]
        local now_score = ARGV[3]
        local member = ARGV[4]

        if redis.call('EXISTS', job_key) == 0 then
            return false
        end
        local worker = redis.call('HGET', job_key, 'worker_id')
        local status = redis.call('HGET', job_key, 'status')
        local retry_score = redis.call('HGET', job_key, 'retry_delay_score')

        if worker ~= false and worker ~= '' then
            return false
        end
        if status ~= 'queued' and status ~= 'scheduled' then
            return false
        end
        if retry_score ~= false and retry_score ~= '' and tonumber(retry_score) > tonumber(now_score) then
            return false
        end

        local data = redis.call('HGET', job_key, 'data')
        local job = cjson.decode(data)
        job.status = 'in_progress'
        job.worker_id = worker_id
        job.started_at = now_iso
        job.last_updated_at = now_iso
        job.retry_delay_until = cjson.null
        local encoded = cjson.encode(job)

        redis.call('HSET', job_key, 'data', encoded, 'status', 'in_progress',
            'worker_id', worker_id, 'retry_delay_score', '')
        redis.call('ZREM', queue_key, member)
        redis.call('ZADD', inprogress_key, now_score, member)
        return encoded
        "#,
    )
});

static RECLAIM_SCRIPT: Lazy<redis::Script> = Lazy::new(|| {
    redis::Script::new(
        r#"
        local job_key = KEYS[1]
        local queue_key = KEYS[2]
        local inprogress_key = KEYS[3]
        local member = ARGV[1]
        local now_iso = ARGV[2]
        local stale_before_iso = ARGV[3]
        local new_status = ARGV[4]
        local retry_delay_score = ARGV[5]
        local retry_delay_iso = ARGV[6]
        local error_json = ARGV[7]

        if redis.call('EXISTS', job_key) == 0 then
            return false
        end
        local status = redis.call('HGET', job_key, 'status')
        if status ~= 'in_progress' then
            return false
        end

        local data = redis.call('HGET', job_key, 'data')
        local job = cjson.decode(data)
        if job.started_at ~= nil and job.started_at ~= cjson.null and job.started_at > stale_before_iso then
            return false
        end

        job.status = new_status
        job.worker_id = cjson.null
        job.last_updated_at = now_iso
        job.error = cjson.decode(error_json)
        redis.call('ZREM', inprogress_key, member)

        if new_status == 'scheduled' then
            job.retry_count = job.retry_count + 1
            job.retry_delay_until = retry_delay_iso
            local encoded = cjson.encode(job)
            redis.call('HSET', job_key, 'data', encoded, 'status', 'scheduled',
                'worker_id', '', 'retry_delay_score', retry_delay_score)
            redis.call('ZADD', queue_key, retry_delay_score, member)
            return encoded
        else
            job.completed_at = now_iso
            local encoded = cjson.encode(job)
            redis.call('HSET', job_key, 'data', encoded, 'status', 'failed',
                'worker_id', '', 'retry_delay_score', '')
            return encoded
        end
        "#,
    )
});

pub struct RedisJobStore {
    pool: RedisPool,
    prefix: String,
}

impl RedisJobStore {
    pub fn new(pool: RedisPool, key_prefix: impl Into<String>) -> Self {
        Self {
            pool,
            prefix: key_prefix.into(),
        }
    }

    fn reentry_score(job: &Job) -> Option<f64> {
        match job.status {
            JobStatus::Queued => Some(job.queue_score()),
            JobStatus::Scheduled => Some(job.queue_score()),
            _ => None,
        }
    }
}

#[async_trait::async_trait]
impl JobStore for RedisJobStore {
    async fn create(&self, job: Job) -> Result<Job, JobError> {
        let data = serde_json::to_string(&job).map_err(|e| JobError::StoreError(e.to_string()))?;
        let mut conn = self.pool.get().await.map_err(|e| JobError::StoreError(e.to_string()))?;

        let in_ready_set = matches!(job.status, JobStatus::Queued);
        let score = job.queue_score();

        let created: i64 = conn
            .eval(
                &CREATE_SCRIPT,
                &[&job_key(&self.prefix, job.id), &queue_key(&self.prefix)],
                &[
                    data,
                    job.status.as_str().to_string(),
                    job.worker_id.map(|w| w.to_string()).unwrap_or_default(),
                    Self::reentry_score(&job).map(|s| s.to_string()).unwrap_or_default(),
                    if in_ready_set { "1".to_string() } else { "0".to_string() },
                    score.to_string(),
                    job.id.to_string(),
                ],
            )
            .await
            .map_err(|e| JobError::StoreError(e.to_string()))?;

        if created == 0 {
            return Err(JobError::JobExists(job.id));
        }
        Ok(job)
    }

    async fn get_by_id(&self, id: JobId) -> Result<Option<Job>, JobError> {
        let mut conn = self.pool.get().await.map_err(|e| JobError::StoreError(e.to_string()))?;
        let mut cmd = redis::cmd("HGET");
        cmd.arg(job_key(&self.prefix, id)).arg("data");
        let value = conn.execute(cmd).await.map_err(|e| JobError::StoreError(e.to_string()))?;

        let data: Option<String> = redis::from_redis_value(&value).unwrap_or(None);
        match data {
            Some(raw) => Ok(Some(
                serde_json::from_str(&raw).map_err(|e| JobError::StoreError(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    async fn update(&self, mut job: Job) -> Result<Job, JobError> {
        job.last_updated_at = Utc::now();
        let data = serde_json::to_string(&job).map_err(|e| JobError::StoreError(e.to_string()))?;
        let mut conn = self.pool.get().await.map_err(|e| JobError::StoreError(e.to_string()))?;

        let key = job_key(&self.prefix, job.id);
        let qkey = queue_key(&self.prefix);

        let mut cmd = redis::cmd("HSET");
        cmd.arg(&key)
            .arg("data")
            .arg(&data)
            .arg("status")
            .arg(job.status.as_str())
            .arg("worker_id")
            .arg(job.worker_id.map(|w| w.to_string()).unwrap_or_default())
            .arg("retry_delay_score")
            .arg(Self::reentry_score(&job).map(|s| s.to_string()).unwrap_or_default());
        conn.execute(cmd).await.map_err(|e| JobError::StoreError(e.to_string()))?;

        let mut zrem = redis::cmd("ZREM");
        zrem.arg(&qkey).arg(job.id.to_string());
        conn.execute(zrem).await.map_err(|e| JobError::StoreError(e.to_string()))?;

        if let Some(score) = Self::reentry_score(&job) {
            let mut zadd = redis::cmd("ZADD");
            zadd.arg(&qkey).arg(score).arg(job.id.to_string());
            conn.execute(zadd).await.map_err(|e| JobError::StoreError(e.to_string()))?;
        }

        if job.status != JobStatus::InProgress {
            let mut zrem_ip = redis::cmd("ZREM");
            zrem_ip.arg(inprogress_key(&self.prefix)).arg(job.id.to_string());
            conn.execute(zrem_ip).await.map_err(|e| JobError::StoreError(e.to_string()))?;
        }

        Ok(job)
    }

    async fn claim_next_job_for_worker(&self, worker_id: WorkerId) -> Result<Option<Job>, JobError> {
        let now = Utc::now();
        let now_score = now.timestamp_millis() as f64 / 1000.0;
        let mut conn = self.pool.get().await.map_err(|e| JobError::StoreError(e.to_string()))?;

        let mut range_cmd = redis::cmd("ZRANGEBYSCORE");
        range_cmd
            .arg(queue_key(&self.prefix))
            .arg("-inf")
            .arg(now_score)
            .arg("LIMIT")
            .arg(0)
            .arg(1);
        let value = conn.execute(range_cmd).await.map_err(|e| JobError::StoreError(e.to_string()))?;
        let candidates: Vec<String> =
            redis::from_redis_value(&value).map_err(|e| JobError::StoreError(e.to_string()))?;
        let Some(candidate_id) = candidates.into_iter().next() else {
            return Ok(None);
        };
        let id: JobId = candidate_id
            .parse()
            .map_err(|_| JobError::StoreError("corrupt queue member".to_string()))?;

        let encoded: Option<String> = conn
            .eval(
                &CLAIM_SCRIPT,
                &[&job_key(&self.prefix, id), &queue_key(&self.prefix), &inprogress_key(&self.prefix)],
                &[
                    worker_id.to_string(),
                    now.to_rfc3339(),
                    now_score.to_string(),
                    candidate_id,
                ],
            )
            .await
            .map_err(|e| JobError::StoreError(e.to_string()))?;

        match encoded {
            Some(data) => {
                debug!(job_id = %id, worker_id = %worker_id, "claimed job");
                let job: Job = serde_json::from_str(&data).map_err(|e| JobError::StoreError(e.to_string()))?;
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    fn supports_recovery(&self) -> bool {
        true
    }

    async fn find_stale_in_progress(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<JobId>, JobError> {
        let mut conn = self.pool.get().await.map_err(|e| JobError::StoreError(e.to_string()))?;
        let score = older_than.timestamp_millis() as f64 / 1000.0;

        let mut cmd = redis::cmd("ZRANGEBYSCORE");
        cmd.arg(inprogress_key(&self.prefix))
            .arg("-inf")
            .arg(score)
            .arg("LIMIT")
            .arg(0)
            .arg(limit as i64);
        let value = conn.execute(cmd).await.map_err(|e| JobError::StoreError(e.to_string()))?;
        let members: Vec<String> =
            redis::from_redis_value(&value).map_err(|e| JobError::StoreError(e.to_string()))?;

        Ok(members.into_iter().filter_map(|m| m.parse().ok()).collect())
    }

    async fn reclaim_stale_job(
        &self,
        id: JobId,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        retry_delay: Option<DateTime<Utc>>,
    ) -> Result<Option<Job>, JobError> {
        let mut conn = self.pool.get().await.map_err(|e| JobError::StoreError(e.to_string()))?;

        let job = self.get_by_id(id).await?;
        let Some(job) = job else {
            return Ok(None);
        };
        let will_retry = job.retry_count < job.max_retries;
        let new_status = if will_retry { "scheduled" } else { "failed" };
        let error = crate::job::JobFailure::new("JOB_TIMEOUT", "job timed out while in progress");
        let error_json = serde_json::to_string(&error).map_err(|e| JobError::StoreError(e.to_string()))?;
        let (retry_score, retry_iso) = match retry_delay {
            Some(t) => (t.timestamp_millis() as f64 / 1000.0, t.to_rfc3339()),
            None => (0.0, String::new()),
        };

        let encoded: Option<String> = conn
            .eval(
                &RECLAIM_SCRIPT,
                &[&job_key(&self.prefix, id), &queue_key(&self.prefix), &inprogress_key(&self.prefix)],
                &[
                    id.to_string(),
                    now.to_rfc3339(),
                    stale_before.to_rfc3339(),
                    new_status.to_string(),
                    retry_score.to_string(),
                    retry_iso,
                    error_json,
                ],
            )
            .await
            .map_err(|e| JobError::StoreError(e.to_string()))?;

        match encoded {
            Some(data) => {
                let job: Job = serde_json::from_str(&data).map_err(|e| JobError::StoreError(e.to_string()))?;
                warn!(job_id = %id, status = %job.status, "reclaimed stale job");
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }
}
