//! keyrelay runtime - devices, command processing and supervision.
//!
//! # Crate Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  keyrelay-types   : ids, SourceActor, ErrorCode             │
//! │  keyrelay-event   : EventGroup, Event, EventEmitter         │
//! └─────────────────────────────────────────────────────────────┘
//!                               ↓
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Runtime Layer (THIS CRATE)                 │
//! ├─────────────────────────────────────────────────────────────┤
//! │  io/        : ConsoleInput, FileWatchInput                  │
//! │  service    : CommandService (mode → processor router)      │
//! │  processor/ : CommandProcessor, state machine, timeouts     │
//! │  device/    : OutputDevice, serial / local / log sink       │
//! │  tasks/     : TaskSupervisor                                │
//! │  config/    : KeyrelayConfig, ConfigLoader                  │
//! └─────────────────────────────────────────────────────────────┘
//!                               ↓
//! ┌─────────────────────────────────────────────────────────────┐
//! │  keyrelay-cli     : the `keyrelay` binary                   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Command Flow
//!
//! ```text
//! input adapter ──► CommandService::submit_command
//!                       │ new_root_context, COMMAND_RECEIVED
//!                       ▼
//!                   CommandProcessor::enqueue
//!                       │ priority? ──► state + interrupt task ──► device.interrupt
//!                       ▼
//!                   consumer loop ──► device.send ──► COMMAND_SENT
//! ```
//!
//! # Modules
//!
//! ## [`device`] - Output Devices
//!
//! - [`OutputDevice`]: the backend trait
//! - [`SerialDevice`]: transport-backed device with busy/ready flow control
//! - [`LocalKeyboard`]: in-process injector with layout mapping
//! - [`LogSinkDevice`]: JSON lines file
//!
//! ## [`processor`] - Command Processor
//!
//! - [`CommandProcessor`]: ordered, priority-aware executor for one device
//! - [`ProcessorState`]: `RUNNING` / `PAUSED` / `STOPPED`
//! - [`TimeoutPolicy`]: per-command deadlines
//!
//! ## [`service`] - Command Router
//!
//! - [`CommandService`]: creates causal groups and routes to the active mode
//!
//! ## [`tasks`] - Supervision
//!
//! - [`TaskSupervisor`]: named, independently cancellable loops
//!
//! ## [`config`] - Configuration
//!
//! - [`KeyrelayConfig`](config::KeyrelayConfig), [`ConfigLoader`](config::ConfigLoader)

pub mod config;
pub mod device;
pub mod io;
pub mod processor;
pub mod service;
pub mod tasks;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use device::{
    DeviceError, DeviceKind, KeyLayout, LocalKeyboard, LogSinkDevice, OutputCommand, OutputDevice,
    SerialDevice, SerialSettings,
};
pub use io::{ConsoleInput, FileWatchInput};
pub use processor::{
    CommandProcessor, ProcessorError, ProcessorSettings, ProcessorState, ProcessorStatus,
    TimeoutPolicy,
};
pub use service::{CommandService, CommandServiceBuilder};
pub use tasks::{TaskError, TaskSupervisor};
