use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use asyncjobs_core::config::Config;
use asyncjobs_core::{HandlerRegistry, JobManager};

use crate::response::{DefaultJobResponseFactory, JobResponseFactory};
use crate::state::AppState;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {0}: {1}")]
    Bind(SocketAddr, std::io::Error),
    #[error("server error: {0}")]
    Serve(std::io::Error),
}

/// Starts the HTTP server, mirroring the teacher's `run(config)` entry
/// point. The worker pool is started separately by the caller (see
/// `asyncjobs-cli`'s `server` command) so tests can drive HTTP without
/// also spinning up background workers.
pub async fn run(
    config: Config,
    manager: Arc<JobManager>,
    registry: Arc<HandlerRegistry>,
    response_factory: Arc<dyn JobResponseFactory>,
    addr: SocketAddr,
) -> Result<(), ServerError> {
    let app_state = AppState::new(manager.clone(), registry.clone(), response_factory);
    let app = build_router(app_state);

    info!("asyncjobs API listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::Bind(addr, e))?;
    axum::serve(listener, app).await.map_err(ServerError::Serve)?;

    let _ = config;
    Ok(())
}

pub fn build_router(app_state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/", get(root))
        .merge(crate::routes::jobs_router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

pub fn default_response_factory() -> Arc<dyn JobResponseFactory> {
    Arc::new(DefaultJobResponseFactory)
}

async fn health_check() -> &'static str {
    "OK"
}

async fn root() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "name": "asyncjobs API",
        "version": asyncjobs_core::VERSION,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_check() {
        assert_eq!(health_check().await, "OK");
    }
}
