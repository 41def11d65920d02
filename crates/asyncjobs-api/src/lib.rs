pub mod response;
pub mod routes;
pub mod server;
pub mod state;

pub use response::{DefaultJobResponseFactory, JobResponseFactory};
pub use server::{build_router, default_response_factory, run, ServerError};
pub use state::AppState;
