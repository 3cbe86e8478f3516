//! Supervised background tasks.
//!
//! Input adapter loops (console reader, file watcher) run under a
//! [`TaskSupervisor`], each in its own failure domain.

mod error;
mod supervisor;

pub use error::TaskError;
pub use supervisor::{
    BoxError, TaskResult, TaskSupervisor, DEFAULT_SHUTDOWN_GRACE, DEFAULT_STARTUP_WINDOW,
};
