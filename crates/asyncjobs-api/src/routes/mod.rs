pub mod jobs;

pub use jobs::router as jobs_router;
