use crate::core::config::ExecutorConfig;
use crate::core::errors::{panic_message, ExecutorError, Result, ShutdownStatus, TaskError};
use crate::executor::registry::{GroupLockRegistry, GroupPermit};
use crate::pool::{FixedWorkerPool, WorkUnit, WorkerPool};
use crate::task::{Task, TaskHandle};
use futures::future::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Count of accepted tasks whose handles have not resolved yet
#[derive(Debug)]
struct Outstanding {
    count: watch::Sender<usize>,
}

impl Outstanding {
    fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self { count }
    }

    fn track(self: &Arc<Self>) -> OutstandingTask {
        self.count.send_modify(|n| *n += 1);
        OutstandingTask {
            outstanding: Arc::clone(self),
        }
    }

    fn get(&self) -> usize {
        *self.count.borrow()
    }

    async fn wait_idle(&self) {
        let mut rx = self.count.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

/// Held by a task from submission until its handle resolves or it is dropped
struct OutstandingTask {
    outstanding: Arc<Outstanding>,
}

impl Drop for OutstandingTask {
    fn drop(&mut self) {
        self.outstanding.count.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// Runs tasks on a bounded pool while keeping tasks of one group mutually
/// exclusive.
///
/// Submission never waits. A task whose group is free goes straight into the
/// pool queue; otherwise it takes a place in the group's line and enters the
/// pool queue once the previous task of the group has finished. Workers
/// therefore never sit idle on a group lock, and tasks of one group run in
/// submission order.
pub struct TaskExecutor {
    config: Arc<ExecutorConfig>,
    registry: Arc<GroupLockRegistry>,
    pool: Arc<dyn WorkerPool>,
    runtime: Handle,
    outstanding: Arc<Outstanding>,
    shutdown_flag: AtomicBool,
    shutdown_status: Mutex<Option<ShutdownStatus>>,
    submitted: AtomicU64,
}

impl TaskExecutor {
    /// Executor with `max_concurrency` workers on the current tokio runtime
    pub fn new(max_concurrency: usize) -> Result<Self> {
        Self::with_config(ExecutorConfig::new(max_concurrency))
    }

    pub fn with_config(config: ExecutorConfig) -> Result<Self> {
        config.validate()?;
        let pool = Arc::new(FixedWorkerPool::new(config.max_concurrency)?);
        Self::with_pool(config, pool)
    }

    /// Compose the executor with an existing pool.
    ///
    /// The pool's own worker count bounds parallelism; `max_concurrency`
    /// reports it.
    pub fn with_pool(config: ExecutorConfig, pool: Arc<dyn WorkerPool>) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| {
            ExecutorError::internal_with_source(
                "task executor must be created inside a tokio runtime",
                e,
            )
        })?;
        let config = ExecutorConfig {
            max_concurrency: pool.worker_count(),
            ..config
        };
        info!(
            max_concurrency = config.max_concurrency,
            shutdown_timeout_ms = config.shutdown_timeout_ms,
            "Task executor started"
        );

        Ok(Self {
            config: Arc::new(config),
            registry: Arc::new(GroupLockRegistry::new()),
            pool,
            runtime,
            outstanding: Arc::new(Outstanding::new()),
            shutdown_flag: AtomicBool::new(false),
            shutdown_status: Mutex::new(None),
            submitted: AtomicU64::new(0),
        })
    }

    /// Queue a task and return a handle to its outcome.
    ///
    /// Rejected once `shutdown` has been called.
    pub fn submit_task<T: Send + 'static>(&self, task: Task<T>) -> Result<TaskHandle<T>> {
        if self.shutdown_flag.load(Ordering::Acquire) {
            return Err(ExecutorError::shutdown("submit_task"));
        }

        let (task_id, group, kind, action) = task.into_parts();
        let group_id = group.id();
        let (tx, handle) = TaskHandle::channel(task_id, group_id);
        let tracked = self.outstanding.track();

        // Runs on a worker once the task holds its group's permit
        let unit = move |permit: GroupPermit| -> WorkUnit {
            async move {
                debug!(task_id = %task_id, group_id = %group_id, %kind, "Task started");

                let outcome = match AssertUnwindSafe(async move { action().await })
                    .catch_unwind()
                    .await
                {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(e)) => Err(TaskError::failed(task_id, group_id, e)),
                    Err(payload) => Err(TaskError::panicked(
                        task_id,
                        group_id,
                        panic_message(payload.as_ref()),
                    )),
                };
                drop(permit);

                match &outcome {
                    Ok(_) => debug!(task_id = %task_id, group_id = %group_id, "Task completed"),
                    Err(e) => warn!(
                        task_id = %task_id,
                        group_id = %group_id,
                        category = e.category(),
                        error = %e,
                        "Task failed"
                    ),
                }

                if tx.send(outcome).is_err() {
                    debug!(task_id = %task_id, "Task handle dropped before completion");
                }
                drop(tracked);
            }
            .boxed()
        };

        match self.registry.lock_for(group_id).reserve().try_into_permit() {
            Ok(permit) => self.pool.enqueue(unit(permit))?,
            Err(ticket) => {
                debug!(task_id = %task_id, group_id = %group_id, "Group busy, task waiting for its turn");
                let pool = Arc::clone(&self.pool);
                self.runtime.spawn(async move {
                    let permit = ticket.await;
                    if let Err(e) = pool.enqueue(unit(permit)) {
                        debug!(task_id = %task_id, error = %e, "Task cancelled before its turn");
                    }
                });
            }
        }

        self.submitted.fetch_add(1, Ordering::Relaxed);
        debug!(task_id = %task_id, group_id = %group_id, "Task submitted");
        Ok(handle)
    }

    /// Stop accepting tasks, drain for up to `timeout`, then cancel what is left.
    ///
    /// Safe to call more than once; later calls return the first outcome.
    pub async fn shutdown(&self, timeout: Duration) -> ShutdownStatus {
        let mut status = self.shutdown_status.lock().await;
        if let Some(status) = *status {
            debug!(%status, "Task executor already shut down");
            return status;
        }

        self.shutdown_flag.store(true, Ordering::Release);
        info!(
            submitted = self.submitted.load(Ordering::Relaxed),
            outstanding = self.outstanding.get(),
            groups = self.registry.len(),
            "Task executor shutting down"
        );

        // Tasks waiting in a group line are not in the pool yet, so drain here
        // before the pool stops accepting them
        let started = Instant::now();
        let drained = tokio::time::timeout(timeout, self.outstanding.wait_idle())
            .await
            .is_ok();

        let outcome = if drained {
            // Duration::MAX means no deadline; it must not be added to an Instant
            let remaining = timeout.saturating_sub(started.elapsed());
            self.pool.shutdown(remaining).await
        } else {
            self.pool.shutdown(Duration::ZERO).await;
            ShutdownStatus::Forced
        };

        info!(status = %outcome, "Task executor shut down");
        *status = Some(outcome);
        outcome
    }

    /// `shutdown` with the configured grace period
    pub async fn shutdown_gracefully(&self) -> ShutdownStatus {
        self.shutdown(self.config.shutdown_timeout()).await
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_flag.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn max_concurrency(&self) -> usize {
        self.config.max_concurrency
    }

    pub fn registry(&self) -> &GroupLockRegistry {
        &self.registry
    }

    /// Distinct groups seen since construction
    pub fn group_count(&self) -> usize {
        self.registry.len()
    }

    /// Tasks waiting for a worker
    pub fn queued(&self) -> usize {
        self.pool.queued()
    }

    /// Tasks accepted but not yet finished
    pub fn outstanding(&self) -> usize {
        self.outstanding.get()
    }

    /// Tasks accepted since construction
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{TaskGroup, TaskId, TaskKind};
    use std::sync::atomic::AtomicUsize;

    fn task<T, F, Fut>(group: TaskGroup, action: F) -> Task<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Task::new(TaskId::random(), group, TaskKind::Write, action)
    }

    fn decode(payload: &[u8]) -> u32 {
        match payload.first() {
            Some(byte) => u32::from(*byte),
            None => panic!("empty payload"),
        }
    }

    #[tokio::test]
    async fn test_submit_and_await() {
        let executor = TaskExecutor::new(2).unwrap();
        let group = TaskGroup::random();

        let handle = executor.submit_task(task(group, || async { Ok(21 * 2) })).unwrap();
        assert_eq!(handle.group_id(), group.id());
        assert_eq!(handle.await.unwrap(), 42);
        assert_eq!(executor.group_count(), 1);
        assert_eq!(executor.submitted(), 1);
    }

    #[tokio::test]
    async fn test_zero_concurrency_rejected() {
        let err = TaskExecutor::new(0).err().unwrap();
        assert_eq!(err.category(), "configuration");
    }

    #[tokio::test]
    async fn test_failure_releases_group_lock() {
        let executor = TaskExecutor::new(2).unwrap();
        let group = TaskGroup::random();

        let failing = executor
            .submit_task(task::<u32, _, _>(group, || async {
                Err(anyhow::anyhow!("write conflict"))
            }))
            .unwrap();
        let next = executor.submit_task(task(group, || async { Ok(7_u32) })).unwrap();

        let err = failing.await.unwrap_err();
        assert_eq!(err.category(), "failed");
        assert!(err.to_string().contains("write conflict"));
        assert_eq!(next.await.unwrap(), 7);
        assert!(!executor.registry().lock_for(group.id()).is_held());
    }

    #[tokio::test]
    async fn test_panic_is_captured() {
        let executor = TaskExecutor::new(1).unwrap();
        let group = TaskGroup::random();

        let panicking = executor
            .submit_task(task(group, || async { Ok(decode(&[])) }))
            .unwrap();
        let next = executor.submit_task(task(group, || async { Ok("ok") })).unwrap();

        match panicking.await {
            Err(TaskError::Panicked { message, .. }) => assert_eq!(message, "empty payload"),
            other => panic!("expected panic capture, got {:?}", other),
        }
        assert_eq!(next.await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_rejects_after_shutdown() {
        let executor = TaskExecutor::new(1).unwrap();
        assert_eq!(
            executor.shutdown(Duration::from_secs(1)).await,
            ShutdownStatus::Drained
        );
        assert!(executor.is_shutdown());

        let err = executor
            .submit_task(task(TaskGroup::random(), || async { Ok(()) }))
            .unwrap_err();
        assert_eq!(err.category(), "shutdown");
    }

    #[tokio::test]
    async fn test_shutdown_without_deadline_drains() {
        let executor = TaskExecutor::new(1).unwrap();
        let group = TaskGroup::random();
        let first = executor
            .submit_task(task(group, || async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(1)
            }))
            .unwrap();
        let second = executor.submit_task(task(group, || async { Ok(2) })).unwrap();

        assert_eq!(executor.shutdown(Duration::MAX).await, ShutdownStatus::Drained);
        assert_eq!(first.await.unwrap(), 1);
        assert_eq!(second.await.unwrap(), 2);

        // The pool was closed as well, not just the submission gate
        let err = executor
            .submit_task(task(group, || async { Ok(3) }))
            .unwrap_err();
        assert_eq!(err.category(), "shutdown");
        assert_eq!(executor.queued(), 0);
        assert_eq!(executor.shutdown(Duration::ZERO).await, ShutdownStatus::Drained);
    }

    #[tokio::test]
    async fn test_same_group_never_overlaps() {
        let executor = TaskExecutor::new(4).unwrap();
        let group = TaskGroup::random();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                executor
                    .submit_task(task(group, move || async move {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    }))
                    .unwrap()
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_with_custom_pool() {
        let pool = Arc::new(FixedWorkerPool::new(3).unwrap());
        let executor = TaskExecutor::with_pool(ExecutorConfig::new(10), pool).unwrap();
        assert_eq!(executor.max_concurrency(), 3);

        let handle = executor
            .submit_task(task(TaskGroup::random(), || async { Ok(1_u8) }))
            .unwrap();
        assert_eq!(handle.await.unwrap(), 1);
    }
}
