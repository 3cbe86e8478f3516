//! Input adapters.
//!
//! An input adapter turns an external stimulus into command text and
//! hands it to the [`CommandService`](crate::CommandService), which
//! creates the causal group. Adapters never talk to a processor or a
//! device directly.
//!
//! | Adapter | Source actor | Submission |
//! |---------|--------------|------------|
//! | [`ConsoleInput`] | `COMMAND_LINE` | one command per line |
//! | [`FileWatchInput`] | `FILE_WATCHER` | whole file as one batch |
//!
//! Both are long-lived loops meant to run under the
//! [`TaskSupervisor`](crate::TaskSupervisor).

mod console;
mod file_watch;

pub use console::ConsoleInput;
pub use file_watch::{FileWatchInput, DEFAULT_POLL_INTERVAL};
