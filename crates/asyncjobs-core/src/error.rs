//! Stable, wire-safe error taxonomy for the job framework.
//!
//! Every store and manager operation returns a tagged result rather than
//! raising; `JobError::code()` gives the stable string an HTTP adapter can
//! surface in a problem-details body without string-matching `Display`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::job::JobStatus;

pub type JobResult<T> = std::result::Result<T, JobError>;

#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
pub enum JobError {
    #[error("invalid job: {0}")]
    InvalidJob(String),

    #[error("invalid job id: {0}")]
    InvalidJobId(String),

    #[error("job not found: {0}")]
    JobNotFound(Uuid),

    #[error("job already exists: {0}")]
    JobExists(Uuid),

    #[error("job not claimed: {0}")]
    JobNotClaimed(Uuid),

    #[error("invalid state transition: {from:?} -> {to:?}")]
    InvalidStateTransition { from: JobStatus, to: JobStatus },

    #[error("handler not registered: {0}")]
    HandlerNotRegistered(String),

    #[error("deserialization error: {0}")]
    DeserializationError(String),

    #[error("job timed out: {0}")]
    JobTimeout(Uuid),

    #[error("store error: {0}")]
    StoreError(String),

    #[error("submission error: {0}")]
    SubmissionError(String),
}

impl JobError {
    /// Stable, language-agnostic identifier for this error kind.
    pub fn code(&self) -> &'static str {
        match self {
            JobError::InvalidJob(_) => "INVALID_JOB",
            JobError::InvalidJobId(_) => "INVALID_JOB_ID",
            JobError::JobNotFound(_) => "JOB_NOT_FOUND",
            JobError::JobExists(_) => "JOB_EXISTS",
            JobError::JobNotClaimed(_) => "JOB_NOT_CLAIMED",
            JobError::InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION",
            JobError::HandlerNotRegistered(_) => "HANDLER_NOT_REGISTERED",
            JobError::DeserializationError(_) => "DESERIALIZATION_ERROR",
            JobError::JobTimeout(_) => "JOB_TIMEOUT",
            JobError::StoreError(_) => "STORE_ERROR",
            JobError::SubmissionError(_) => "SUBMISSION_ERROR",
        }
    }

    pub fn store(msg: impl Into<String>) -> Self {
        JobError::StoreError(msg.into())
    }
}

impl From<crate::cache::CacheError> for JobError {
    fn from(err: crate::cache::CacheError) -> Self {
        JobError::StoreError(err.to_string())
    }
}

impl From<serde_json::Error> for JobError {
    fn from(err: serde_json::Error) -> Self {
        JobError::DeserializationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(JobError::JobNotFound(Uuid::nil()).code(), "JOB_NOT_FOUND");
        assert_eq!(
            JobError::InvalidStateTransition {
                from: JobStatus::Completed,
                to: JobStatus::Canceled
            }
            .code(),
            "INVALID_STATE_TRANSITION"
        );
    }

    #[test]
    fn display_includes_context() {
        let err = JobError::HandlerNotRegistered("Echo".to_string());
        assert!(err.to_string().contains("Echo"));
    }
}
