//! Bounded worker pool over an unbounded FIFO queue

pub mod work_queue;
pub mod worker_pool;

pub use work_queue::WorkQueue;
pub use worker_pool::{FixedWorkerPool, WorkUnit, WorkerPool};
