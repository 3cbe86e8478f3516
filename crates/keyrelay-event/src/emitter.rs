//! EventEmitter - group factory and event fan-out.
//!
//! The [`EventEmitter`] is the only way to create groups and events.
//! It stamps every group with a fresh id and publishes every event it
//! creates through [`emit`](EventEmitter::emit).
//!
//! # Fan-out
//!
//! ```text
//!                      ┌──────────────┐
//! Processor ──emit()──►│ EventEmitter │── broadcast ──► subscriber (test)
//! Devices   ──emit()──►│              │── broadcast ──► listen(TracingListener)
//! Service   ──emit()──►│              │── broadcast ──► ...
//!                      └──────────────┘
//! ```
//!
//! Publishing uses a bounded `tokio::sync::broadcast` channel. A slow
//! subscriber lags and loses the oldest events; it never blocks the
//! publisher. With no subscriber at all, publishing is a no-op.
//!
//! # Auto-publish
//!
//! An emitter built with [`silent`](EventEmitter::silent) still constructs
//! events but does not publish them from `emit`. Explicit
//! [`publish`](EventEmitter::publish) calls always go through.

use crate::command::CommandKind;
use crate::event::{Event, EventType};
use crate::group::{CommandContext, EventBatch, EventGroup};
use keyrelay_types::SourceActor;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Default broadcast capacity.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Receiver of published events, driven by [`EventEmitter::listen`].
///
/// Each listener runs in its own task. A listener that panics ends its
/// own task and nothing else.
pub trait EventListener: Send + Sync + 'static {
    /// Called once per received event.
    fn on_event(&self, event: &Event);

    /// Name used in log lines about this listener.
    fn name(&self) -> &str {
        "listener"
    }
}

/// Writes the event trail to the `tracing` log at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingListener;

impl EventListener for TracingListener {
    fn on_event(&self, event: &Event) {
        debug!(
            kind = %event.kind,
            source = %event.source,
            parent = %event.parent_id,
            data = event.data.as_deref().unwrap_or(""),
            "event"
        );
    }

    fn name(&self) -> &str {
        "tracing"
    }
}

/// Factory for groups and events, and publisher of events.
///
/// Cloning is cheap and clones share the same subscribers.
///
/// # Example
///
/// ```
/// use keyrelay_event::{CommandKind, EventEmitter, EventGroup, EventType};
/// use keyrelay_types::SourceActor;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let emitter = EventEmitter::new(16);
/// let mut rx = emitter.subscribe();
///
/// let ctx = emitter.new_root_context(SourceActor::Web, CommandKind::Key, Some("key:ENTER".into()));
/// let group = EventGroup::from(ctx.clone());
/// emitter.emit(SourceActor::Web, &group, EventType::CommandReceived, None);
///
/// let event = rx.recv().await.unwrap();
/// assert_eq!(event.parent_id, ctx.id());
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct EventEmitter {
    tx: broadcast::Sender<Event>,
    auto_publish: bool,
}

impl EventEmitter {
    /// Creates an emitter that publishes every event it emits.
    ///
    /// `capacity` is the per-subscriber backlog before lagging (min 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self::with_auto_publish(capacity, true)
    }

    /// Creates an emitter whose [`emit`](Self::emit) constructs but does not publish.
    #[must_use]
    pub fn silent(capacity: usize) -> Self {
        Self::with_auto_publish(capacity, false)
    }

    #[must_use]
    pub fn with_auto_publish(capacity: usize, auto_publish: bool) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, auto_publish }
    }

    #[must_use]
    pub fn auto_publish(&self) -> bool {
        self.auto_publish
    }

    // === Group factory ===

    /// Creates a causal root for a single command.
    #[must_use]
    pub fn new_root_context(
        &self,
        actor: SourceActor,
        command: CommandKind,
        value: Option<String>,
    ) -> Arc<CommandContext> {
        let ctx = Arc::new(CommandContext::new(actor, command, value, None));
        trace!(group = %ctx.id(), actor = %actor, ?command, "new root context");
        ctx
    }

    /// Creates an empty batch.
    #[must_use]
    pub fn new_batch(&self, actor: SourceActor, contents: Option<String>) -> Arc<EventBatch> {
        let batch = Arc::new(EventBatch::new(actor, contents));
        trace!(group = %batch.id(), actor = %actor, "new batch");
        batch
    }

    /// Creates a context that belongs to `batch` and appends it to the
    /// batch's member list.
    #[must_use]
    pub fn new_context_in_batch(
        &self,
        batch: &Arc<EventBatch>,
        actor: SourceActor,
        command: CommandKind,
        value: Option<String>,
    ) -> Arc<CommandContext> {
        let ctx = Arc::new(CommandContext::new(actor, command, value, Some(batch.id())));
        batch.push(Arc::clone(&ctx));
        trace!(group = %ctx.id(), batch = %batch.id(), ?command, "new context in batch");
        ctx
    }

    // === Events ===

    /// Constructs an event without publishing it.
    #[must_use]
    pub fn event(
        &self,
        actor: SourceActor,
        parent: &EventGroup,
        kind: EventType,
        data: Option<String>,
    ) -> Event {
        Event::new(actor, parent.id(), kind, data)
    }

    /// Constructs an event and publishes it (unless the emitter is silent).
    pub fn emit(
        &self,
        actor: SourceActor,
        parent: &EventGroup,
        kind: EventType,
        data: Option<String>,
    ) -> Event {
        let event = self.event(actor, parent, kind, data);
        if self.auto_publish {
            self.publish(&event);
        }
        event
    }

    /// Publishes an event to every current subscriber.
    ///
    /// Returns the number of subscribers that will see it.
    pub fn publish(&self, event: &Event) -> usize {
        trace!(kind = %event.kind, parent = %event.parent_id, "publish");
        // Err only means there is no subscriber right now.
        self.tx.send(event.clone()).unwrap_or(0)
    }

    /// Returns a new receiver for events published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Drives `listener` from a dedicated task until every emitter clone
    /// is dropped.
    ///
    /// Must be called from within a tokio runtime.
    pub fn listen<L: EventListener>(&self, listener: L) -> JoinHandle<()> {
        let mut rx = self.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => listener.on_event(&event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(listener = listener.name(), skipped = n, "event listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!(listener = listener.name(), "event stream closed");
                        break;
                    }
                }
            }
        })
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn contexts_get_unique_ids() {
        let emitter = EventEmitter::silent(4);
        let a = emitter.new_root_context(SourceActor::Gui, CommandKind::Key, None);
        let b = emitter.new_root_context(SourceActor::Gui, CommandKind::Key, None);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn context_in_batch_is_appended() {
        let emitter = EventEmitter::silent(4);
        let batch = emitter.new_batch(SourceActor::FileWatcher, Some("key:A\nkey:B".into()));
        let a = emitter.new_context_in_batch(&batch, SourceActor::FileWatcher, CommandKind::Key, Some("key:A".into()));
        let b = emitter.new_context_in_batch(&batch, SourceActor::FileWatcher, CommandKind::Key, Some("key:B".into()));

        assert_eq!(batch.member_ids(), vec![a.id(), b.id()]);
        assert_eq!(a.batch_id(), Some(batch.id()));
        assert_eq!(b.batch_id(), Some(batch.id()));
    }

    #[tokio::test]
    async fn emit_publishes_to_subscribers() {
        let emitter = EventEmitter::new(8);
        let mut rx1 = emitter.subscribe();
        let mut rx2 = emitter.subscribe();

        let ctx = emitter.new_root_context(SourceActor::Web, CommandKind::Text, None);
        let group = EventGroup::from(ctx);
        let sent = emitter.emit(SourceActor::Web, &group, EventType::CommandReceived, Some("text:hi".into()));

        assert_eq!(rx1.recv().await.unwrap(), sent);
        assert_eq!(rx2.recv().await.unwrap(), sent);
    }

    #[tokio::test]
    async fn silent_emitter_does_not_publish_from_emit() {
        let emitter = EventEmitter::silent(8);
        let mut rx = emitter.subscribe();
        let group = EventGroup::from(emitter.new_root_context(SourceActor::Web, CommandKind::Key, None));

        let event = emitter.emit(SourceActor::Web, &group, EventType::CommandReceived, None);
        assert!(rx.try_recv().is_err());

        // Explicit publish still works.
        assert_eq!(emitter.publish(&event), 1);
        assert_eq!(rx.recv().await.unwrap().id, event.id);
    }

    #[test]
    fn publish_without_subscribers_is_noop() {
        let emitter = EventEmitter::new(2);
        let group = EventGroup::from(emitter.new_root_context(SourceActor::Unknown, CommandKind::Undefined, None));
        let event = emitter.event(SourceActor::Unknown, &group, EventType::CommandReceived, None);
        assert_eq!(emitter.publish(&event), 0);
    }

    #[tokio::test]
    async fn lagging_subscriber_does_not_block_publisher() {
        let emitter = EventEmitter::new(2);
        let mut slow = emitter.subscribe();
        let group = EventGroup::from(emitter.new_root_context(SourceActor::Web, CommandKind::Key, None));

        for _ in 0..10 {
            emitter.emit(SourceActor::Web, &group, EventType::CommandQueued, None);
        }

        assert!(matches!(
            slow.recv().await,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
    }

    struct Collect(Arc<Mutex<Vec<EventType>>>);

    impl EventListener for Collect {
        fn on_event(&self, event: &Event) {
            self.0.lock().push(event.kind);
        }
    }

    #[tokio::test]
    async fn listen_forwards_events() {
        let emitter = EventEmitter::new(8);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let task = emitter.listen(Collect(Arc::clone(&seen)));

        let group = EventGroup::from(emitter.new_root_context(SourceActor::Gui, CommandKind::Key, None));
        emitter.emit(SourceActor::Gui, &group, EventType::CommandReceived, None);
        emitter.emit(SourceActor::Gui, &group, EventType::CommandSent, None);

        drop(emitter);
        task.await.unwrap();

        assert_eq!(
            *seen.lock(),
            vec![EventType::CommandReceived, EventType::CommandSent]
        );
    }
}
