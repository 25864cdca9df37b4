use crate::core::errors::{ExecutorError, Result};
use futures::future::{BoxFuture, FutureExt};
use std::fmt;
use std::future::Future;
use uuid::Uuid;

/// Identifier of a task group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(Uuid);

/// Identifier of a single task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(Uuid);

macro_rules! uuid_id {
    ($name:ident, $field:literal) => {
        impl $name {
            /// Wrap a UUID, rejecting the nil UUID
            pub fn new(id: Uuid) -> Result<Self> {
                if id.is_nil() {
                    return Err(ExecutorError::validation_field(
                        concat!($field, " id must not be nil"),
                        $field,
                    ));
                }
                Ok(Self(id))
            }

            pub fn random() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl TryFrom<Uuid> for $name {
            type Error = ExecutorError;

            fn try_from(id: Uuid) -> Result<Self> {
                Self::new(id)
            }
        }
    };
}

uuid_id!(GroupId, "group");
uuid_id!(TaskId, "task");

/// A logical partition of tasks that must never run concurrently
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskGroup {
    id: GroupId,
}

impl TaskGroup {
    pub fn new(id: Uuid) -> Result<Self> {
        Ok(Self {
            id: GroupId::new(id)?,
        })
    }

    pub fn random() -> Self {
        Self {
            id: GroupId::random(),
        }
    }

    pub fn id(&self) -> GroupId {
        self.id
    }
}

impl From<GroupId> for TaskGroup {
    fn from(id: GroupId) -> Self {
        Self { id }
    }
}

/// Informational tag; scheduling ignores it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Read,
    Write,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
        }
    }
}

/// The deferred body of a task. Called at most once, on a worker.
pub type TaskAction<T> = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<T>> + Send>;

/// A unit of work bound to a group
pub struct Task<T> {
    id: TaskId,
    group: TaskGroup,
    kind: TaskKind,
    action: TaskAction<T>,
}

impl<T: Send + 'static> Task<T> {
    /// Build a task from an async action
    pub fn new<F, Fut>(id: TaskId, group: TaskGroup, kind: TaskKind, action: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self {
            id,
            group,
            kind,
            action: Box::new(move || action().boxed()),
        }
    }

    /// Build a task from a synchronous action.
    ///
    /// The action runs on tokio's blocking pool so a long computation or a
    /// sleeping thread does not stall the worker's runtime thread. It still
    /// occupies its worker and its group lock until it returns.
    pub fn blocking<F>(id: TaskId, group: TaskGroup, kind: TaskKind, action: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        Self::new(id, group, kind, move || async move {
            match tokio::task::spawn_blocking(action).await {
                Ok(result) => result,
                Err(join_err) => match join_err.try_into_panic() {
                    Ok(payload) => std::panic::resume_unwind(payload),
                    Err(join_err) => Err(anyhow::Error::new(join_err)),
                },
            }
        })
    }

    pub fn builder() -> TaskBuilder<T> {
        TaskBuilder::new()
    }
}

impl<T> Task<T> {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn group(&self) -> &TaskGroup {
        &self.group
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub(crate) fn into_parts(self) -> (TaskId, TaskGroup, TaskKind, TaskAction<T>) {
        (self.id, self.group, self.kind, self.action)
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("group", &self.group)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Builder for Task; `build` reports the first missing field
pub struct TaskBuilder<T> {
    id: Option<TaskId>,
    group: Option<TaskGroup>,
    kind: Option<TaskKind>,
    action: Option<TaskAction<T>>,
}

impl<T: Send + 'static> TaskBuilder<T> {
    pub fn new() -> Self {
        Self {
            id: None,
            group: None,
            kind: None,
            action: None,
        }
    }

    pub fn id(mut self, id: TaskId) -> Self {
        self.id = Some(id);
        self
    }

    /// Use a fresh random id
    pub fn random_id(self) -> Self {
        self.id(TaskId::random())
    }

    pub fn group(mut self, group: TaskGroup) -> Self {
        self.group = Some(group);
        self
    }

    pub fn kind(mut self, kind: TaskKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn action<F, Fut>(mut self, action: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.action = Some(Box::new(move || action().boxed()));
        self
    }

    pub fn build(self) -> Result<Task<T>> {
        let id = self
            .id
            .ok_or_else(|| ExecutorError::validation_field("task id is required", "id"))?;
        let group = self
            .group
            .ok_or_else(|| ExecutorError::validation_field("task group is required", "group"))?;
        let kind = self
            .kind
            .ok_or_else(|| ExecutorError::validation_field("task kind is required", "kind"))?;
        let action = self
            .action
            .ok_or_else(|| ExecutorError::validation_field("task action is required", "action"))?;

        Ok(Task {
            id,
            group,
            kind,
            action,
        })
    }
}

impl<T: Send + 'static> Default for TaskBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}
