//! The job entity, its state machine, and the HTTP context it carries.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::JobError;

pub type JobId = Uuid;
pub type WorkerId = Uuid;

/// Lifecycle state of a job. Discriminants are part of the wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued = 100,
    Scheduled = 200,
    InProgress = 300,
    Completed = 400,
    Failed = 500,
    Canceled = 600,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Canceled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Scheduled => "scheduled",
            JobStatus::InProgress => "in_progress",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Preserved HTTP context, immutable after the job is created. This is the
/// `HttpLike` shape: headers as a multi-map, route params as name->value,
/// query as an ordered list of pairs.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RequestContext {
    #[serde(default)]
    pub headers: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub route_params: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub query_params: Vec<(String, String)>,
}

impl RequestContext {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.first().map(String::as_str)
    }
}

/// Captures type name, message, stack trace, and an optional inner error
/// identically regardless of source language, so serialized job failures
/// round-trip across hosts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExceptionInfo {
    pub type_name: String,
    pub message: String,
    pub stack_trace: Option<String>,
    pub inner: Option<Box<ExceptionInfo>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobFailure {
    pub code: String,
    pub message: String,
    pub exception: Option<ExceptionInfo>,
}

impl JobFailure {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            exception: None,
        }
    }
}

/// The single durable entity. Handlers receive an immutable snapshot;
/// every transition produces a new snapshot and a single `Update` call
/// (copy-on-write — never mutate a live record in place).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: JobId,
    pub name: String,
    pub status: JobStatus,
    pub payload: Vec<u8>,
    pub context: RequestContext,
    pub result: Option<Vec<u8>>,
    pub error: Option<JobFailure>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub retry_delay_until: Option<DateTime<Utc>>,
    pub worker_id: Option<WorkerId>,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Job {
    pub fn new(
        id: JobId,
        name: impl Into<String>,
        payload: Vec<u8>,
        context: RequestContext,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            status: JobStatus::Queued,
            payload,
            context,
            result: None,
            error: None,
            retry_count: 0,
            max_retries,
            retry_delay_until: None,
            worker_id: None,
            created_at: now,
            last_updated_at: now,
            started_at: None,
            completed_at: None,
            tags: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    /// The score used for ready-set ordering: `retry_delay_until` if set,
    /// else `created_at`, as seconds since the Unix epoch.
    pub fn queue_score(&self) -> f64 {
        self.retry_delay_until
            .unwrap_or(self.created_at)
            .timestamp_millis() as f64
            / 1000.0
    }

    /// Whether this job currently belongs in the ready set.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            JobStatus::Queued => true,
            JobStatus::Scheduled => self.retry_delay_until.map_or(true, |t| t <= now),
            _ => false,
        }
    }

    pub fn can_transition(from: JobStatus, to: JobStatus) -> bool {
        use JobStatus::*;
        if from == to {
            return true;
        }
        matches!(
            (from, to),
            (Queued, InProgress)
                | (Queued, Scheduled)
                | (Queued, Canceled)
                | (Scheduled, Queued)
                | (Scheduled, Canceled)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (InProgress, Scheduled)
                | (InProgress, Canceled)
                | (Failed, Queued)
                | (Failed, Scheduled)
        )
    }

    /// Validates and applies a status transition, refreshing
    /// `last_updated_at`. Returns a new snapshot; never mutates other
    /// fields — callers set those explicitly before or after calling this.
    fn transition_to(&self, to: JobStatus, now: DateTime<Utc>) -> Result<Job, JobError> {
        if !Self::can_transition(self.status, to) {
            return Err(JobError::InvalidStateTransition {
                from: self.status,
                to,
            });
        }
        let mut next = self.clone();
        next.status = to;
        next.last_updated_at = now;
        Ok(next)
    }

    pub fn claim(&self, worker_id: WorkerId, now: DateTime<Utc>) -> Result<Job, JobError> {
        let mut next = self.transition_to(JobStatus::InProgress, now)?;
        next.worker_id = Some(worker_id);
        next.started_at = Some(now);
        Ok(next)
    }

    pub fn complete(&self, result: Vec<u8>, now: DateTime<Utc>) -> Result<Job, JobError> {
        let mut next = self.transition_to(JobStatus::Completed, now)?;
        next.result = Some(result);
        next.completed_at = Some(now);
        next.worker_id = None;
        next.retry_delay_until = None;
        Ok(next)
    }

    /// Applies a failure outcome, honoring `RetryCount <= MaxRetries`: the
    /// caller supplies the already-computed backoff delay (if any).
    pub fn fail(
        &self,
        error: JobFailure,
        retry_delay: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Job, JobError> {
        if self.retry_count < self.max_retries {
            let mut next = self.transition_to(JobStatus::Scheduled, now)?;
            next.retry_count += 1;
            next.retry_delay_until = retry_delay;
            next.worker_id = None;
            next.error = Some(error);
            Ok(next)
        } else {
            let mut next = self.transition_to(JobStatus::Failed, now)?;
            next.completed_at = Some(now);
            next.error = Some(error);
            next.worker_id = None;
            next.retry_delay_until = None;
            Ok(next)
        }
    }

    pub fn cancel(&self, now: DateTime<Utc>) -> Result<Job, JobError> {
        let mut next = self.transition_to(JobStatus::Canceled, now)?;
        next.completed_at = Some(now);
        next.worker_id = None;
        next.retry_delay_until = None;
        Ok(next)
    }

    pub fn requeue(&self, now: DateTime<Utc>) -> Result<Job, JobError> {
        let mut next = self.transition_to(JobStatus::Queued, now)?;
        next.worker_id = None;
        next.retry_delay_until = None;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_job(now: DateTime<Utc>) -> Job {
        Job::new(Uuid::new_v4(), "Echo", b"{}".to_vec(), RequestContext::default(), 3, now)
    }

    #[test]
    fn new_job_is_queued_with_zero_retries() {
        let now = Utc::now();
        let job = new_job(now);
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.retry_count, 0);
        assert!(job.worker_id.is_none());
    }

    #[test]
    fn claim_sets_worker_and_started_at() {
        let now = Utc::now();
        let job = new_job(now);
        let worker = Uuid::new_v4();
        let claimed = job.claim(worker, now + Duration::seconds(1)).unwrap();
        assert_eq!(claimed.status, JobStatus::InProgress);
        assert_eq!(claimed.worker_id, Some(worker));
        assert!(claimed.started_at.is_some());
    }

    #[test]
    fn completed_cannot_transition_to_canceled() {
        // Open question resolution: Completed -> Canceled is rejected.
        assert!(!Job::can_transition(JobStatus::Completed, JobStatus::Canceled));
    }

    #[test]
    fn invalid_transition_is_rejected_and_leaves_status_unchanged() {
        let now = Utc::now();
        let job = new_job(now);
        let err = job.transition_to(JobStatus::Completed, now).unwrap_err();
        assert_eq!(err.code(), "INVALID_STATE_TRANSITION");
    }

    #[test]
    fn fail_within_budget_schedules_retry_and_increments_count() {
        let now = Utc::now();
        let job = new_job(now).claim(Uuid::new_v4(), now).unwrap();
        let delay_until = now + Duration::seconds(4);
        let failed = job
            .fail(JobFailure::new("BOOM", "failed"), Some(delay_until), now)
            .unwrap();
        assert_eq!(failed.status, JobStatus::Scheduled);
        assert_eq!(failed.retry_count, 1);
        assert_eq!(failed.retry_delay_until, Some(delay_until));
        assert!(failed.worker_id.is_none());
    }

    #[test]
    fn fail_exhausting_retries_marks_failed() {
        let now = Utc::now();
        let mut job = new_job(now);
        job.max_retries = 0;
        let job = job.claim(Uuid::new_v4(), now).unwrap();
        let failed = job.fail(JobFailure::new("BOOM", "failed"), None, now).unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert!(failed.completed_at.is_some());
        assert!(failed.retry_delay_until.is_none());
    }

    #[test]
    fn terminal_states_have_no_worker_or_retry_delay() {
        let now = Utc::now();
        let job = new_job(now).claim(Uuid::new_v4(), now).unwrap();
        let completed = job.complete(b"ok".to_vec(), now).unwrap();
        assert!(completed.worker_id.is_none());
        assert!(completed.retry_delay_until.is_none());
    }

    #[test]
    fn is_ready_respects_retry_delay() {
        let now = Utc::now();
        let mut job = new_job(now);
        job.status = JobStatus::Scheduled;
        job.retry_delay_until = Some(now + Duration::seconds(10));
        assert!(!job.is_ready(now));
        assert!(job.is_ready(now + Duration::seconds(11)));
    }
}
