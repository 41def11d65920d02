//! The producer/consumer worker pool.

pub mod consumer;
pub mod producer;
pub mod service;

pub use consumer::JobConsumer;
pub use producer::JobProducer;
pub use service::{BackgroundService, WorkerPoolConfig};
