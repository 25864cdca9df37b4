// Core infrastructure shared by the pool and the executor

pub mod config;
pub mod errors;

// Re-export commonly used types
pub use config::{ExecutorConfig, ExecutorConfigBuilder};
pub use errors::{ExecutorError, Result, ShutdownStatus, TaskError};
