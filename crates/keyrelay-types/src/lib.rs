//! Core types for keyrelay.
//!
//! This crate holds the vocabulary shared by every other keyrelay crate:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  keyrelay-types   : ids, SourceActor, ErrorCode  ◄── HERE   │
//! │  keyrelay-event   : EventGroup, Event, EventEmitter         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  keyrelay-runtime : devices, processor, service, tasks      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  keyrelay-cli     : the `keyrelay` binary                   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use keyrelay_types::{EventId, GroupId, SourceActor};
//!
//! let group = GroupId::new();
//! let event = EventId::new();
//! assert_ne!(group.uuid(), event.uuid());
//! assert_eq!(SourceActor::Web.to_string(), "WEB");
//! ```

mod actor;
mod error;
mod id;

pub use actor::SourceActor;
pub use error::{assert_error_code, assert_error_codes, ErrorCode};
pub use id::{EventId, GroupId};
