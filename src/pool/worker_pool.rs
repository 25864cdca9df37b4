use crate::core::errors::{panic_message, ExecutorError, Result, ShutdownStatus};
use crate::pool::work_queue::WorkQueue;
use async_trait::async_trait;
use futures::future::{join_all, BoxFuture, FutureExt};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// A zero-argument unit of work as seen by the pool
pub type WorkUnit = BoxFuture<'static, ()>;

/// Bounded set of workers draining an unbounded FIFO queue
#[async_trait]
pub trait WorkerPool: Send + Sync {
    /// Queue a unit of work. Fails only once shutdown has begun.
    fn enqueue(&self, unit: WorkUnit) -> Result<()>;

    /// Stop accepting work and wait up to `timeout` for queued and running
    /// work to finish, cancelling whatever is left after that. Later calls
    /// return the first call's status.
    async fn shutdown(&self, timeout: Duration) -> ShutdownStatus;

    fn worker_count(&self) -> usize;

    /// Units waiting for a worker
    fn queued(&self) -> usize;

    /// Units currently executing
    fn active(&self) -> usize;

    fn is_shutdown(&self) -> bool;
}

/// Worker pool with a fixed number of tokio tasks sharing one queue
pub struct FixedWorkerPool {
    queue: Arc<WorkQueue<WorkUnit>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
    active: Arc<AtomicUsize>,
    shutdown_status: tokio::sync::Mutex<Option<ShutdownStatus>>,
}

impl FixedWorkerPool {
    /// Spawn `workers` workers on the current tokio runtime.
    ///
    /// Fails if `workers` is zero or no runtime is running.
    pub fn new(workers: usize) -> Result<Self> {
        if workers == 0 {
            return Err(ExecutorError::configuration_field(
                "worker pool needs at least one worker",
                "workers",
                ">= 1",
                "0",
            ));
        }
        let runtime = Handle::try_current().map_err(|e| {
            ExecutorError::internal_with_source(
                "worker pool must be created inside a tokio runtime",
                e,
            )
        })?;

        let queue = Arc::new(WorkQueue::new());
        let active = Arc::new(AtomicUsize::new(0));
        let handles = (0..workers)
            .map(|worker_id| {
                runtime.spawn(worker_loop(
                    worker_id,
                    Arc::clone(&queue),
                    Arc::clone(&active),
                ))
            })
            .collect();

        debug!(workers, "Worker pool started");

        Ok(Self {
            queue,
            workers: Mutex::new(handles),
            worker_count: workers,
            active,
            shutdown_status: tokio::sync::Mutex::new(None),
        })
    }
}

#[async_trait]
impl WorkerPool for FixedWorkerPool {
    fn enqueue(&self, unit: WorkUnit) -> Result<()> {
        self.queue
            .push(unit)
            .map_err(|_| ExecutorError::shutdown("enqueue"))
    }

    async fn shutdown(&self, timeout: Duration) -> ShutdownStatus {
        let mut status = self.shutdown_status.lock().await;
        if let Some(status) = *status {
            debug!(%status, "Worker pool already shut down");
            return status;
        }

        self.queue.close();
        info!(
            queued = self.queue.len(),
            active = self.active(),
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            "Shutting down worker pool"
        );

        let mut workers = {
            let mut guard = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *guard)
        };

        let outcome = match tokio::time::timeout(timeout, join_all(workers.iter_mut())).await {
            Ok(_) => ShutdownStatus::Drained,
            Err(_) => {
                let interrupted = self.active();
                for worker in &workers {
                    worker.abort();
                }
                join_all(workers).await;
                let dropped = self.queue.clear().await;
                warn!(
                    interrupted,
                    dropped, "Shutdown grace period elapsed, outstanding work cancelled"
                );
                ShutdownStatus::Forced
            }
        };

        info!(status = %outcome, "Worker pool shut down");
        *status = Some(outcome);
        outcome
    }

    fn worker_count(&self) -> usize {
        self.worker_count
    }

    fn queued(&self) -> usize {
        self.queue.len()
    }

    fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    fn is_shutdown(&self) -> bool {
        self.queue.is_closed()
    }
}

impl Drop for FixedWorkerPool {
    fn drop(&mut self) {
        // Workers finish what is queued, then exit
        self.queue.close();
    }
}

/// Marks one unit as running for as long as it lives
struct ActiveUnit<'a> {
    active: &'a AtomicUsize,
}

impl<'a> ActiveUnit<'a> {
    fn start(active: &'a AtomicUsize) -> Self {
        active.fetch_add(1, Ordering::AcqRel);
        Self { active }
    }
}

impl Drop for ActiveUnit<'_> {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }
}

async fn worker_loop(worker_id: usize, queue: Arc<WorkQueue<WorkUnit>>, active: Arc<AtomicUsize>) {
    debug!(worker_id, "Worker started");

    while let Some(unit) = queue.pop().await {
        let _running = ActiveUnit::start(&active);
        if let Err(payload) = AssertUnwindSafe(unit).catch_unwind().await {
            error!(
                worker_id,
                panic = %panic_message(payload.as_ref()),
                "Work unit panicked"
            );
        }
    }

    debug!(worker_id, "Worker stopped");
}
