//! `Submit` and `Get job` from the core's external request delegate
//! (spec §6): the only two HTTP operations the core exposes.

use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use uuid::Uuid;

use asyncjobs_core::job::RequestContext;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/jobs/submit/:name",
            post(submit_job).put(submit_job).patch(submit_job).delete(submit_job),
        )
        .route("/jobs/:id", get(get_job))
}

fn build_context(headers: &HeaderMap, query: &HashMap<String, String>) -> RequestContext {
    let mut header_map: HashMap<String, Vec<String>> = HashMap::new();
    for (name, value) in headers.iter() {
        if let Ok(value) = value.to_str() {
            header_map
                .entry(name.as_str().to_string())
                .or_default()
                .push(value.to_string());
        }
    }
    RequestContext {
        headers: header_map,
        route_params: HashMap::new(),
        query_params: query.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
    }
}

/// Parses the `Async-Job-Id` idempotency header, if present and a valid
/// 128-bit identifier; an unparsable header is ignored rather than
/// rejected, matching spec.md's "if present and parsable".
fn idempotency_id(headers: &HeaderMap) -> Option<Uuid> {
    headers
        .get("Async-Job-Id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v).ok())
}

async fn submit_job(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let context = build_context(&headers, &query);
    let external_id = idempotency_id(&headers);

    match state.manager.submit(name, body.to_vec(), context, external_id).await {
        Ok(job) => state.response_factory.job_accepted(&job),
        Err(e) => {
            tracing::error!(error = %e, "job submission failed");
            state.response_factory.error(&e)
        }
    }
}

async fn get_job(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let id = match Uuid::parse_str(&id) {
        Ok(id) => id,
        Err(_) => {
            return state
                .response_factory
                .error(&asyncjobs_core::JobError::InvalidJobId(id));
        }
    };

    match state.manager.get_job_by_id(id).await {
        Ok(Some(job)) => state.response_factory.job_snapshot(&job),
        Ok(None) => state
            .response_factory
            .error(&asyncjobs_core::JobError::JobNotFound(id)),
        Err(e) => state.response_factory.error(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::DefaultJobResponseFactory;
    use asyncjobs_core::{HandlerRegistry, JobManager, JobManagerConfig};
    use asyncjobs_core::store::InMemoryJobStore;
    use axum::http::Request;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        let store: Arc<dyn asyncjobs_core::JobStore> = Arc::new(InMemoryJobStore::new());
        let manager = Arc::new(JobManager::new(store, JobManagerConfig::default()));
        AppState::new(manager, Arc::new(HandlerRegistry::new()), Arc::new(DefaultJobResponseFactory))
    }

    #[tokio::test]
    async fn submit_returns_202_with_job_id_header() {
        let state = test_state();
        let app = router().with_state(state);

        let request = Request::builder()
            .method("POST")
            .uri("/jobs/submit/Echo")
            .header("content-type", "application/json")
            .body(axum::body::Body::from(r#"{"v":"hi"}"#))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert!(response.headers().contains_key("Async-Job-Id"));
    }

    #[tokio::test]
    async fn get_unknown_job_returns_404() {
        let state = test_state();
        let app = router().with_state(state);

        let request = Request::builder()
            .method("GET")
            .uri(format!("/jobs/{}", Uuid::new_v4()))
            .body(axum::body::Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn idempotent_submission_reuses_job_id() {
        let state = test_state();
        let app = router().with_state(state);
        let external_id = Uuid::new_v4();

        for _ in 0..2 {
            let request = Request::builder()
                .method("POST")
                .uri("/jobs/submit/Echo")
                .header("Async-Job-Id", external_id.to_string())
                .body(axum::body::Body::from(r#"{"v":1}"#))
                .unwrap();
            let response = app.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::ACCEPTED);
            let header = response.headers().get("Async-Job-Id").unwrap();
            assert_eq!(header.to_str().unwrap(), external_id.to_string());
        }
    }
}
