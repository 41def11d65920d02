//! The pluggable response factory from the core's design notes: turns a
//! job snapshot or a `JobError` into an HTTP response. The core treats
//! payload/result as opaque bytes; the default factory here renders them
//! as embedded JSON when they parse as JSON, and as base64 otherwise, so
//! a JSON-speaking client never has to decode an array of byte values.

use asyncjobs_core::{Job, JobError};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::Value;

pub trait JobResponseFactory: Send + Sync {
    fn job_accepted(&self, job: &Job) -> Response;
    fn job_snapshot(&self, job: &Job) -> Response;
    fn error(&self, err: &JobError) -> Response;
}

#[derive(Serialize)]
struct JobSnapshot {
    id: uuid::Uuid,
    name: String,
    status: String,
    payload: Value,
    result: Option<Value>,
    error: Option<asyncjobs_core::job::JobFailure>,
    retry_count: u32,
    max_retries: u32,
    retry_delay_until: Option<chrono::DateTime<chrono::Utc>>,
    created_at: chrono::DateTime<chrono::Utc>,
    last_updated_at: chrono::DateTime<chrono::Utc>,
    started_at: Option<chrono::DateTime<chrono::Utc>>,
    completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

fn bytes_to_value(bytes: &[u8]) -> Value {
    use base64::Engine;
    // JSON is the default codec (see asyncjobs_core::codec), so this
    // fallback is only exercised by handlers using a custom binary codec.
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(base64::engine::general_purpose::STANDARD.encode(bytes)))
}

impl From<&Job> for JobSnapshot {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            name: job.name.clone(),
            status: job.status.as_str().to_string(),
            payload: bytes_to_value(&job.payload),
            result: job.result.as_deref().map(bytes_to_value),
            error: job.error.clone(),
            retry_count: job.retry_count,
            max_retries: job.max_retries,
            retry_delay_until: job.retry_delay_until,
            created_at: job.created_at,
            last_updated_at: job.last_updated_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
        }
    }
}

/// The default JSON response factory; the one built into the crate.
pub struct DefaultJobResponseFactory;

impl JobResponseFactory for DefaultJobResponseFactory {
    fn job_accepted(&self, job: &Job) -> Response {
        let snapshot = JobSnapshot::from(job);
        let mut response = (StatusCode::ACCEPTED, Json(snapshot)).into_response();
        if let Ok(value) = axum::http::HeaderValue::from_str(&job.id.to_string()) {
            response.headers_mut().insert("Async-Job-Id", value);
        }
        response
    }

    fn job_snapshot(&self, job: &Job) -> Response {
        Json(JobSnapshot::from(job)).into_response()
    }

    fn error(&self, err: &JobError) -> Response {
        let status = match err {
            JobError::InvalidJob(_) | JobError::InvalidJobId(_) | JobError::DeserializationError(_) => {
                StatusCode::BAD_REQUEST
            }
            JobError::JobNotFound(_) => StatusCode::NOT_FOUND,
            JobError::JobExists(_)
            | JobError::JobNotClaimed(_)
            | JobError::InvalidStateTransition { .. } => StatusCode::CONFLICT,
            JobError::HandlerNotRegistered(_) => StatusCode::NOT_IMPLEMENTED,
            JobError::JobTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            JobError::StoreError(_) | JobError::SubmissionError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let problem = serde_json::json!({
            "type": format!("https://asyncjobs.dev/errors/{}", err.code().to_lowercase()),
            "title": err.code(),
            "status": status.as_u16(),
            "detail": err.to_string(),
        });
        (status, Json(problem)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asyncjobs_core::job::RequestContext;
    use chrono::Utc;

    #[test]
    fn accepted_response_carries_job_id_header() {
        let job = Job::new(uuid::Uuid::new_v4(), "Echo", br#"{"v":1}"#.to_vec(), RequestContext::default(), 3, Utc::now());
        let factory = DefaultJobResponseFactory;
        let response = factory.job_accepted(&job);
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let header = response.headers().get("Async-Job-Id").unwrap();
        assert_eq!(header.to_str().unwrap(), job.id.to_string());
    }

    #[test]
    fn not_found_maps_to_404() {
        let factory = DefaultJobResponseFactory;
        let err = JobError::JobNotFound(uuid::Uuid::new_v4());
        let response = factory.error(&err);
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
