//! Causal event model for keyrelay.
//!
//! Every command that enters keyrelay gets a causal root, an
//! [`EventGroup`]. Every observable fact that follows (queued, sent,
//! ignored, timed out, ...) is an [`Event`] whose `parent_id` points at
//! that root.
//!
//! ```text
//! Input adapter
//!     │ new_root_context / new_batch / new_context_in_batch
//!     ▼
//! ┌──────────────┐    emit(actor, group, type, data)    ┌───────────────┐
//! │ EventEmitter │ ───────────────────────────────────► │   listeners   │
//! └──────────────┘          broadcast fan-out           └───────────────┘
//!     │ EventGroup
//!     ▼
//! Command processor ─► output device
//! ```
//!
//! # Crate Layout
//!
//! - [`command`]: [`PriorityCommand`], [`CommandKind`], prefix splitting
//! - [`group`]: [`CommandContext`], [`EventBatch`], [`EventGroup`]
//! - [`event`]: [`Event`], [`EventType`]
//! - [`emitter`]: [`EventEmitter`], [`EventListener`], [`TracingListener`]
//!
//! # Example
//!
//! ```
//! use keyrelay_event::{CommandKind, EventEmitter, EventGroup, EventType};
//! use keyrelay_types::SourceActor;
//!
//! let emitter = EventEmitter::silent(16);
//! let ctx = emitter.new_root_context(
//!     SourceActor::CommandLine,
//!     CommandKind::classify("key:ENTER"),
//!     Some("key:ENTER".into()),
//! );
//! let event = emitter.emit(
//!     SourceActor::CommandLine,
//!     &EventGroup::from(ctx.clone()),
//!     EventType::CommandReceived,
//!     None,
//! );
//! assert_eq!(event.parent_id, ctx.id());
//! ```

pub mod command;
pub mod emitter;
pub mod event;
pub mod group;

pub use command::{split_command, CommandKind, PriorityCommand};
pub use emitter::{EventEmitter, EventListener, TracingListener, DEFAULT_EVENT_CAPACITY};
pub use event::{Event, EventType};
pub use group::{CommandContext, EventBatch, EventGroup};
