pub mod serde;
pub mod worker_pool;

pub use worker_pool::{TaskHandle, WorkerPool, WorkerPoolError};
