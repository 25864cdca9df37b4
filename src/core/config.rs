use crate::core::errors::{ExecutorError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Grace period `shutdown_gracefully` waits before forcing cancellation
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 60_000;

/// Executor configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Number of workers, and so the maximum number of tasks running at once
    pub max_concurrency: usize,
    /// Grace period for draining queued and in-flight work on shutdown
    pub shutdown_timeout_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        let cpu_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        Self {
            max_concurrency: cpu_count,
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT_MS,
        }
    }
}

impl ExecutorConfig {
    /// Configuration with the given concurrency and the default grace period
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            max_concurrency,
            ..Default::default()
        }
    }

    /// Create a new builder for ExecutorConfig
    pub fn builder() -> ExecutorConfigBuilder {
        ExecutorConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(ExecutorError::configuration_field(
                "max_concurrency must be greater than 0",
                "max_concurrency",
                ">= 1",
                self.max_concurrency.to_string(),
            ));
        }
        Ok(())
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Small pool with a short grace period, for development and tests
    pub fn development() -> Self {
        Self {
            max_concurrency: 4,
            shutdown_timeout_ms: 5_000,
        }
    }

    /// One worker: every task runs strictly one after another
    pub fn single_worker() -> Self {
        Self::new(1)
    }

    /// Parse and validate a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ExecutorError::io(format!("read config {}", path.display()), e))?;
        Self::from_yaml_str(&contents)
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// Builder for ExecutorConfig
#[derive(Debug, Default)]
pub struct ExecutorConfigBuilder {
    config: ExecutorConfig,
}

impl ExecutorConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the worker count
    pub fn max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.config.max_concurrency = max_concurrency;
        self
    }

    /// Set the shutdown grace period
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<ExecutorConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
