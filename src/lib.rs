//! # group-executor
//!
//! A bounded-concurrency task executor. Tasks run in parallel up to a fixed
//! worker count, except that tasks sharing a [`TaskGroup`] never run at the
//! same time.
//!
//! ```rust,no_run
//! use group_executor::{Task, TaskExecutor, TaskGroup, TaskId, TaskKind};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let executor = TaskExecutor::new(4)?;
//!     let accounts = TaskGroup::random();
//!
//!     let handle = executor.submit_task(Task::new(
//!         TaskId::random(),
//!         accounts,
//!         TaskKind::Write,
//!         || async { Ok(1) },
//!     ))?;
//!     println!("result: {}", handle.await?);
//!
//!     executor.shutdown(Duration::from_secs(5)).await;
//!     Ok(())
//! }
//! ```

// Core infrastructure modules
pub mod core;

pub mod executor; // Group locks and the executor
pub mod pool; // Worker pool
pub mod task; // Task model and handles

// Re-exports for convenience
pub use core::config::{ExecutorConfig, ExecutorConfigBuilder};
pub use core::errors::{ExecutorError, Result, ShutdownStatus, TaskError};
pub use executor::{GroupLock, GroupLockRegistry, GroupPermit, GroupTicket, TaskExecutor};
pub use pool::{FixedWorkerPool, WorkQueue, WorkUnit, WorkerPool};
pub use task::{GroupId, Task, TaskAction, TaskBuilder, TaskGroup, TaskHandle, TaskId, TaskKind};
