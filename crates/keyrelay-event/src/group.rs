//! Causal grouping primitives.
//!
//! An [`EventGroup`] is the causal root that every [`Event`](crate::Event)
//! points back to through its `parent_id`. There are two shapes:
//!
//! ```text
//! EventGroup
//!   ├── Context(CommandContext)   one command or sub-step
//!   └── Batch(EventBatch)         one multi-line submission
//!         └── members: [CommandContext, CommandContext, ...]
//! ```
//!
//! Groups are immutable once created, with one exception: a batch's
//! member list grows as the factory creates contexts inside it. A context
//! learns its batch at creation time and never changes it.
//!
//! Groups can only be created through [`EventEmitter`](crate::EventEmitter),
//! which guarantees a fresh [`GroupId`] for each.

use crate::command::CommandKind;
use chrono::{DateTime, Utc};
use keyrelay_types::{GroupId, SourceActor};
use parking_lot::RwLock;
use std::sync::Arc;

/// Causal root for a single command.
#[derive(Debug)]
pub struct CommandContext {
    id: GroupId,
    source: SourceActor,
    command: CommandKind,
    timestamp: DateTime<Utc>,
    contents: Option<String>,
    batch: Option<GroupId>,
}

impl CommandContext {
    pub(crate) fn new(
        source: SourceActor,
        command: CommandKind,
        contents: Option<String>,
        batch: Option<GroupId>,
    ) -> Self {
        Self {
            id: GroupId::new(),
            source,
            command,
            timestamp: Utc::now(),
            contents,
            batch,
        }
    }

    #[must_use]
    pub fn id(&self) -> GroupId {
        self.id
    }

    #[must_use]
    pub fn source(&self) -> SourceActor {
        self.source
    }

    #[must_use]
    pub fn command(&self) -> CommandKind {
        self.command
    }

    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Raw command text that produced this context, if any.
    #[must_use]
    pub fn contents(&self) -> Option<&str> {
        self.contents.as_deref()
    }

    /// Id of the batch this context belongs to, if any.
    #[must_use]
    pub fn batch_id(&self) -> Option<GroupId> {
        self.batch
    }
}

/// Group of contexts created from one multi-line submission.
#[derive(Debug)]
pub struct EventBatch {
    id: GroupId,
    source: SourceActor,
    timestamp: DateTime<Utc>,
    contents: Option<String>,
    members: RwLock<Vec<Arc<CommandContext>>>,
}

impl EventBatch {
    pub(crate) fn new(source: SourceActor, contents: Option<String>) -> Self {
        Self {
            id: GroupId::new(),
            source,
            timestamp: Utc::now(),
            contents,
            members: RwLock::new(Vec::new()),
        }
    }

    /// Appends a member. Only the factory calls this, right after it
    /// created `ctx` with this batch's id.
    pub(crate) fn push(&self, ctx: Arc<CommandContext>) {
        debug_assert_eq!(ctx.batch_id(), Some(self.id));
        self.members.write().push(ctx);
    }

    #[must_use]
    pub fn id(&self) -> GroupId {
        self.id
    }

    #[must_use]
    pub fn source(&self) -> SourceActor {
        self.source
    }

    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Full raw text of the submission, if recorded.
    #[must_use]
    pub fn contents(&self) -> Option<&str> {
        self.contents.as_deref()
    }

    /// Snapshot of the members, in creation order.
    #[must_use]
    pub fn members(&self) -> Vec<Arc<CommandContext>> {
        self.members.read().clone()
    }

    /// Ids of the members, in creation order.
    #[must_use]
    pub fn member_ids(&self) -> Vec<GroupId> {
        self.members.read().iter().map(|m| m.id()).collect()
    }

    #[must_use]
    pub fn contains(&self, id: GroupId) -> bool {
        self.members.read().iter().any(|m| m.id() == id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.members.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.read().is_empty()
    }
}

/// A causal context: either a single command or a batch.
///
/// Cheap to clone; both variants are reference counted.
///
/// # Example
///
/// ```
/// use keyrelay_event::{CommandKind, EventEmitter, EventGroup};
/// use keyrelay_types::SourceActor;
///
/// let emitter = EventEmitter::silent(16);
/// let batch = emitter.new_batch(SourceActor::Web, Some("line:a\nline:b".into()));
/// let ctx = emitter.new_context_in_batch(&batch, SourceActor::Web, CommandKind::Line, Some("line:a".into()));
///
/// let group = EventGroup::from(batch.clone());
/// assert!(group.is_batch());
/// assert_eq!(group.command(), CommandKind::Undefined);
/// assert!(batch.contains(ctx.id()));
/// ```
#[derive(Debug, Clone)]
pub enum EventGroup {
    Context(Arc<CommandContext>),
    Batch(Arc<EventBatch>),
}

impl EventGroup {
    #[must_use]
    pub fn id(&self) -> GroupId {
        match self {
            Self::Context(ctx) => ctx.id(),
            Self::Batch(batch) => batch.id(),
        }
    }

    #[must_use]
    pub fn source(&self) -> SourceActor {
        match self {
            Self::Context(ctx) => ctx.source(),
            Self::Batch(batch) => batch.source(),
        }
    }

    /// Logical command of the group; batches are always `Undefined`.
    #[must_use]
    pub fn command(&self) -> CommandKind {
        match self {
            Self::Context(ctx) => ctx.command(),
            Self::Batch(_) => CommandKind::Undefined,
        }
    }

    #[must_use]
    pub fn contents(&self) -> Option<&str> {
        match self {
            Self::Context(ctx) => ctx.contents(),
            Self::Batch(batch) => batch.contents(),
        }
    }

    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Context(ctx) => ctx.timestamp(),
            Self::Batch(batch) => batch.timestamp(),
        }
    }

    #[must_use]
    pub fn is_batch(&self) -> bool {
        matches!(self, Self::Batch(_))
    }

    #[must_use]
    pub fn as_context(&self) -> Option<&Arc<CommandContext>> {
        match self {
            Self::Context(ctx) => Some(ctx),
            Self::Batch(_) => None,
        }
    }

    #[must_use]
    pub fn as_batch(&self) -> Option<&Arc<EventBatch>> {
        match self {
            Self::Batch(batch) => Some(batch),
            Self::Context(_) => None,
        }
    }
}

impl From<Arc<CommandContext>> for EventGroup {
    fn from(ctx: Arc<CommandContext>) -> Self {
        Self::Context(ctx)
    }
}

impl From<Arc<EventBatch>> for EventGroup {
    fn from(batch: Arc<EventBatch>) -> Self {
        Self::Batch(batch)
    }
}

impl std::fmt::Display for EventGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Context(ctx) => write!(f, "context {} from {}", ctx.id(), ctx.source()),
            Self::Batch(batch) => write!(
                f,
                "batch {} from {} ({} members)",
                batch.id(),
                batch.source(),
                batch.len()
            ),
        }
    }
}
