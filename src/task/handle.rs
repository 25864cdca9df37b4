use crate::core::errors::TaskError;
use crate::task::{GroupId, TaskId};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

pub(crate) type ResultSender<T> = oneshot::Sender<Result<T, TaskError>>;

/// Caller-side view of a submitted task.
///
/// The executor writes the outcome exactly once. Await the handle, poll it
/// with [`TaskHandle::try_result`], or block on it from synchronous code with
/// [`TaskHandle::blocking_wait`]. If the executor drops the task without
/// running it (forced shutdown), the handle resolves to
/// [`TaskError::Cancelled`].
#[derive(Debug)]
pub struct TaskHandle<T> {
    task_id: TaskId,
    group_id: GroupId,
    rx: oneshot::Receiver<Result<T, TaskError>>,
}

impl<T> TaskHandle<T> {
    pub(crate) fn channel(task_id: TaskId, group_id: GroupId) -> (ResultSender<T>, Self) {
        let (tx, rx) = oneshot::channel();
        (
            tx,
            Self {
                task_id,
                group_id,
                rx,
            },
        )
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn group_id(&self) -> GroupId {
        self.group_id
    }

    /// Take the outcome if it is ready.
    ///
    /// Returns `None` while the task is queued or running. The outcome is
    /// handed out once; polling again after that reports cancellation.
    pub fn try_result(&mut self) -> Option<Result<T, TaskError>> {
        match self.rx.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => {
                Some(Err(TaskError::cancelled(self.task_id, self.group_id)))
            }
        }
    }

    /// Block the current thread until the outcome arrives.
    ///
    /// Panics if called from inside an async runtime, like
    /// `oneshot::Receiver::blocking_recv`.
    pub fn blocking_wait(self) -> Result<T, TaskError> {
        let Self {
            task_id,
            group_id,
            rx,
        } = self;
        rx.blocking_recv()
            .unwrap_or_else(|_| Err(TaskError::cancelled(task_id, group_id)))
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, TaskError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let task_id = self.task_id;
        let group_id = self.group_id;
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(TaskError::cancelled(task_id, group_id))))
    }
}
