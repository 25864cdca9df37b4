//! Task and group value types, and the handle a submission returns

pub mod handle;
pub mod model;

pub use handle::TaskHandle;
pub use model::{GroupId, Task, TaskAction, TaskBuilder, TaskGroup, TaskId, TaskKind};
