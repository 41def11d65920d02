use std::sync::Arc;

use asyncjobs_core::{HandlerRegistry, JobManager};

use crate::response::JobResponseFactory;

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<JobManager>,
    pub registry: Arc<HandlerRegistry>,
    pub response_factory: Arc<dyn JobResponseFactory>,
}

impl AppState {
    pub fn new(
        manager: Arc<JobManager>,
        registry: Arc<HandlerRegistry>,
        response_factory: Arc<dyn JobResponseFactory>,
    ) -> Self {
        Self {
            manager,
            registry,
            response_factory,
        }
    }
}
