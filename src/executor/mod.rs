//! Group-serializing task executor

pub mod group_executor;
pub mod registry;

pub use group_executor::TaskExecutor;
pub use registry::{GroupLock, GroupLockRegistry, GroupPermit, GroupTicket};
