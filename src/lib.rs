pub mod config;
pub mod core;
pub mod error;
pub mod log;
pub mod orchestration;
pub mod system;
pub mod util;

pub use config::Config;
pub use crate::core::{Priority, Task, TaskId, TaskKind, TaskPayload, TaskState};
pub use error::{Error, Result};
pub use orchestration::{Coordinator, CoordinatorEvent, TaskHandle, TaskResult};
pub use system::{Backend, BackendError, ExecutionContext, ProbeReport, SystemId, SystemOutput, SystemSpec};
