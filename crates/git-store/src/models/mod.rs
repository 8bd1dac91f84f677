pub mod operation_log;
pub mod task;
pub mod workspace;

pub use operation_log::{LogLevel, OperationLogEntry, OperationLogRow};
pub use task::{CreateTask, Task, TaskRow, TaskStatus, TaskUpdate, epoch_to_utc};
pub use workspace::{CreateWorkspace, DiskSpaceInfo, Workspace, WorkspaceRow, WorkspaceUsage};
