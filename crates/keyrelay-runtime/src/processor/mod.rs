//! Command processor - the serial execution engine.
//!
//! One processor drives exactly one [`OutputDevice`]. Any number of input
//! adapters enqueue commands concurrently; a single consumer task hands
//! them to the device one at a time, in submission order.
//!
//! # Architecture
//!
//! ```text
//!  enqueue("key:A", ctx) ──► normal queue (unbounded) ──► consumer task ──► device.send
//!                                                            │  ▲
//!                                                            ▼  │ resume
//!                                                         held queue
//!
//!  enqueue("STOP", ctx) ──► control(): state + epoch (sync)
//!                              └──► priority queue ──► interrupt task ──► device.interrupt
//! ```
//!
//! Priority commands never wait behind normal ones: their effect on the
//! processor state is applied before `enqueue` returns, and the device
//! directive travels on its own queue to its own task, so it reaches the
//! device even while a normal send is blocked on a busy device.
//!
//! # Dispatch Rules
//!
//! | State | Normal command pulled from the queue |
//! |-------|--------------------------------------|
//! | `RUNNING` | sent with a deadline from [`TimeoutPolicy`] |
//! | `PAUSED` | moved to the held queue, sent in order after RESUME |
//! | `STOPPED` | discarded (`COMMAND_IGNORED`) |
//!
//! A command enqueued before a STOP is discarded even if RESUME arrives
//! before the consumer reaches it (see [`state`]).
//!
//! # Failure Isolation
//!
//! Device errors and timeouts are logged with the causal group id and
//! published as events; the consumer moves on to the next command. Only
//! [`CommandProcessor::shutdown`] ends the consumer.

mod error;
mod held;
pub mod state;
mod timeout;

pub use error::ProcessorError;
pub use state::{ProcessorState, Transition};
pub use timeout::TimeoutPolicy;

use crate::device::{DeviceError, DeviceKind, OutputCommand, OutputDevice};
use held::HeldQueue;
use keyrelay_event::{CommandKind, EventEmitter, EventGroup, EventType, PriorityCommand};
use keyrelay_types::{ErrorCode, SourceActor};
use parking_lot::Mutex;
use serde::Serialize;
use state::ControlState;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Tunables of a processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorSettings {
    pub timeouts: TimeoutPolicy,
    /// Deadline for delivering one priority directive to the device.
    pub interrupt_timeout: Duration,
    /// How long shutdown waits for the worker tasks before aborting them.
    pub shutdown_grace: Duration,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            timeouts: TimeoutPolicy::default(),
            interrupt_timeout: Duration::from_secs(2),
            shutdown_grace: Duration::from_secs(2),
        }
    }
}

/// Point-in-time view of a processor, for UI affordances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProcessorStatus {
    pub device: DeviceKind,
    pub state: ProcessorState,
    /// Normal commands waiting in the queue.
    pub queued: usize,
    /// Normal commands held back by a pause.
    pub held: usize,
    /// Commands currently handed to the device (0 or 1).
    pub in_flight: usize,
    /// Deadline of the command in flight.
    pub in_flight_timeout: Option<Duration>,
    pub dispatched: u64,
    /// Normal commands discarded by a stop.
    pub dropped: u64,
    /// Normal commands that failed or timed out.
    pub failed: u64,
    pub closed: bool,
}

impl ProcessorStatus {
    /// Nothing is queued or being sent, and nothing held will be released
    /// without a further control command.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.queued == 0
            && self.in_flight == 0
            && (self.held == 0 || self.state != ProcessorState::Running)
    }
}

#[derive(Debug)]
pub(crate) struct QueuedCommand {
    pub(crate) text: String,
    pub(crate) group: EventGroup,
    /// Stop epoch at enqueue time.
    pub(crate) epoch: u64,
}

#[derive(Debug)]
struct Directive {
    command: PriorityCommand,
    group: EventGroup,
}

#[derive(Debug, Default)]
struct Counters {
    queued: AtomicUsize,
    held: AtomicUsize,
    in_flight: AtomicUsize,
    /// 0 when nothing is in flight.
    in_flight_timeout_ms: AtomicU64,
    dispatched: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
}

/// State shared between the handle and its two tasks.
struct Shared {
    kind: DeviceKind,
    device: Arc<dyn OutputDevice>,
    emitter: EventEmitter,
    settings: ProcessorSettings,
    control: Mutex<ControlState>,
    state_changed: Notify,
    shutdown: watch::Sender<bool>,
    closed: AtomicBool,
    counters: Counters,
    /// Causal root for processor lifecycle events.
    root: EventGroup,
}

/// Priority-aware serial executor in front of one output device.
///
/// # Example
///
/// ```
/// use keyrelay_event::{CommandKind, EventEmitter, EventGroup};
/// use keyrelay_runtime::{CommandProcessor, LogSinkDevice, ProcessorSettings, ProcessorState};
/// use keyrelay_types::SourceActor;
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let dir = std::env::temp_dir().join("keyrelay-doc-processor.jsonl");
/// let emitter = EventEmitter::new(64);
/// let processor = CommandProcessor::new(
///     Arc::new(LogSinkDevice::new(dir)),
///     emitter.clone(),
///     ProcessorSettings::default(),
/// );
///
/// let ctx = emitter.new_root_context(SourceActor::Web, CommandKind::Key, None);
/// processor.enqueue("key:A", &EventGroup::from(ctx.clone())).unwrap();
/// processor.enqueue("pause", &EventGroup::from(ctx)).unwrap();
/// assert_eq!(processor.state(), ProcessorState::Paused);
///
/// processor.shutdown().await;
/// # }
/// ```
pub struct CommandProcessor {
    shared: Arc<Shared>,
    normal_tx: Mutex<Option<mpsc::UnboundedSender<QueuedCommand>>>,
    priority_tx: Mutex<Option<mpsc::UnboundedSender<Directive>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CommandProcessor {
    /// Creates a processor and starts its consumer and interrupt tasks.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn new(
        device: Arc<dyn OutputDevice>,
        emitter: EventEmitter,
        settings: ProcessorSettings,
    ) -> Self {
        let kind = device.kind();
        let root = EventGroup::from(emitter.new_root_context(
            SourceActor::SystemSetup,
            CommandKind::Undefined,
            Some(format!("processor:{kind}")),
        ));
        let (shutdown, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            kind,
            device,
            emitter,
            settings,
            control: Mutex::new(ControlState::default()),
            state_changed: Notify::new(),
            shutdown,
            closed: AtomicBool::new(false),
            counters: Counters::default(),
            root,
        });

        let (normal_tx, normal_rx) = mpsc::unbounded_channel();
        let (priority_tx, priority_rx) = mpsc::unbounded_channel();
        let consumer = tokio::spawn(consume(
            Arc::clone(&shared),
            normal_rx,
            shared.shutdown.subscribe(),
        ));
        let interrupter = tokio::spawn(deliver_interrupts(
            Arc::clone(&shared),
            priority_rx,
            shared.shutdown.subscribe(),
        ));
        info!("CommandProcessor {} started", kind);

        Self {
            shared,
            normal_tx: Mutex::new(Some(normal_tx)),
            priority_tx: Mutex::new(Some(priority_tx)),
            tasks: Mutex::new(vec![consumer, interrupter]),
        }
    }

    /// Accepts one command. Never blocks.
    ///
    /// `STOP`, `PAUSE`, `RESUME` and `RESET` (any case) are routed to
    /// [`control`](Self::control); everything else joins the normal queue.
    ///
    /// # Errors
    ///
    /// [`ProcessorError::Closed`] after shutdown, or the error of
    /// [`control`](Self::control) for priority commands.
    pub fn enqueue(&self, text: &str, group: &EventGroup) -> Result<(), ProcessorError> {
        if let Some(command) = PriorityCommand::parse(text) {
            return self.control(command, group);
        }

        let guard = self.normal_tx.lock();
        let tx = guard.as_ref().ok_or(ProcessorError::Closed)?;
        let epoch = self.shared.control.lock().epoch();

        self.shared.counters.queued.fetch_add(1, Ordering::SeqCst);
        let queued = QueuedCommand {
            text: text.to_string(),
            group: group.clone(),
            epoch,
        };
        debug!(group = %group.id(), command = text, "CommandProcessor {}: queued", self.shared.kind);
        // Published before the hand-off so it precedes COMMAND_SENT.
        self.shared.emit(
            group.source(),
            group,
            EventType::CommandQueued,
            Some(text.to_string()),
        );
        if tx.send(queued).is_err() {
            self.shared.counters.queued.fetch_sub(1, Ordering::SeqCst);
            return Err(ProcessorError::Closed);
        }
        Ok(())
    }

    /// Applies a priority command.
    ///
    /// The state transition happens before this returns; the matching
    /// device directive is delivered asynchronously by the interrupt task.
    ///
    /// # Errors
    ///
    /// [`ProcessorError::Closed`] after shutdown;
    /// [`DeviceError::Unsupported`] for RESET on a device without reset.
    pub fn control(
        &self,
        command: PriorityCommand,
        group: &EventGroup,
    ) -> Result<(), ProcessorError> {
        let guard = self.priority_tx.lock();
        let tx = guard.as_ref().ok_or(ProcessorError::Closed)?;
        let kind = self.shared.kind;

        self.shared.emit(
            group.source(),
            group,
            EventType::PriorityReceived,
            Some(command.as_str().to_string()),
        );

        if command == PriorityCommand::Reset && !self.shared.device.supports_reset() {
            let err = DeviceError::unsupported(kind.as_str(), "reset");
            warn!(group = %group.id(), "CommandProcessor {}: {}", kind, err);
            self.shared
                .emit(group.source(), group, EventType::CommandFailed, Some(err.to_string()));
            return Err(err.into());
        }

        let transition = self.shared.control.lock().apply(command);
        if transition.changed() {
            info!(
                group = %group.id(),
                "CommandProcessor {}: {} -> {}",
                kind, transition.from, transition.to
            );
            self.shared.emit(
                group.source(),
                group,
                EventType::StateChanged,
                Some(format!("{}->{}", transition.from, transition.to)),
            );
        }
        self.shared.state_changed.notify_one();

        tx.send(Directive {
            command,
            group: group.clone(),
        })
        .map_err(|_| ProcessorError::Closed)
    }

    /// Discards every queued normal command and stops dispatching.
    pub fn stop(&self, group: &EventGroup) -> Result<(), ProcessorError> {
        self.control(PriorityCommand::Stop, group)
    }

    /// Holds queued normal commands until [`resume`](Self::resume).
    pub fn pause(&self, group: &EventGroup) -> Result<(), ProcessorError> {
        self.control(PriorityCommand::Pause, group)
    }

    pub fn resume(&self, group: &EventGroup) -> Result<(), ProcessorError> {
        self.control(PriorityCommand::Resume, group)
    }

    /// Reinitializes the device, if it supports that.
    pub fn reset(&self, group: &EventGroup) -> Result<(), ProcessorError> {
        self.control(PriorityCommand::Reset, group)
    }

    #[must_use]
    pub fn state(&self) -> ProcessorState {
        self.shared.state()
    }

    #[must_use]
    pub fn device_kind(&self) -> DeviceKind {
        self.shared.kind
    }

    /// Whether this processor drives a device of the given kind.
    #[must_use]
    pub fn is_using_device(&self, kind: DeviceKind) -> bool {
        self.shared.kind == kind
    }

    #[must_use]
    pub fn supports_reset(&self) -> bool {
        self.shared.device.supports_reset()
    }

    #[must_use]
    pub fn settings(&self) -> &ProcessorSettings {
        &self.shared.settings
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn status(&self) -> ProcessorStatus {
        let c = &self.shared.counters;
        ProcessorStatus {
            device: self.shared.kind,
            state: self.state(),
            queued: c.queued.load(Ordering::SeqCst),
            held: c.held.load(Ordering::SeqCst),
            in_flight: c.in_flight.load(Ordering::SeqCst),
            in_flight_timeout: match c.in_flight_timeout_ms.load(Ordering::SeqCst) {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
            dispatched: c.dispatched.load(Ordering::SeqCst),
            dropped: c.dropped.load(Ordering::SeqCst),
            failed: c.failed.load(Ordering::SeqCst),
            closed: self.is_closed(),
        }
    }

    /// Stops both tasks, closes the queues and shuts the device down.
    ///
    /// Idempotent: only the first call has any effect. Commands still
    /// queued are dropped. Errors from the device are logged.
    pub async fn shutdown(&self) {
        let kind = self.shared.kind;
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            debug!("CommandProcessor {}: already shut down", kind);
            return;
        }
        info!("CommandProcessor {}: shutting down", kind);

        self.normal_tx.lock().take();
        self.priority_tx.lock().take();
        self.shared.shutdown.send_replace(true);

        if let Err(e) = self.shared.device.shutdown().await {
            warn!("CommandProcessor {}: device shutdown failed: {}", kind, e);
        }

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let abort = task.abort_handle();
            match tokio::time::timeout(self.shared.settings.shutdown_grace, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.is_cancelled() => {}
                Ok(Err(e)) => warn!("CommandProcessor {}: task panicked: {}", kind, e),
                Err(_) => {
                    warn!("CommandProcessor {}: task did not stop in time, aborting", kind);
                    abort.abort();
                }
            }
        }

        let abandoned = self.shared.counters.queued.swap(0, Ordering::SeqCst)
            + self.shared.counters.held.swap(0, Ordering::SeqCst);
        if abandoned > 0 {
            info!("CommandProcessor {}: dropped {} pending commands", kind, abandoned);
        }
        self.shared.emit(
            SourceActor::SystemSetup,
            &self.shared.root,
            EventType::ProcessorShutdown,
            Some(kind.to_string()),
        );
        info!("CommandProcessor {} stopped", kind);
    }
}

impl std::fmt::Debug for CommandProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandProcessor")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl Drop for CommandProcessor {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

impl Shared {
    fn state(&self) -> ProcessorState {
        self.control.lock().state()
    }

    fn emit(&self, actor: SourceActor, group: &EventGroup, kind: EventType, data: Option<String>) {
        self.emitter.emit(actor, group, kind, data);
    }

    fn set_held(&self, held: usize) {
        self.counters.held.store(held, Ordering::SeqCst);
    }

    fn discard(&self, command: &QueuedCommand) {
        self.counters.dropped.fetch_add(1, Ordering::SeqCst);
        debug!(
            group = %command.group.id(),
            "CommandProcessor {}: dropping {:?} after stop",
            self.kind, command.text
        );
        self.emit(
            command.group.source(),
            &command.group,
            EventType::CommandIgnored,
            Some(command.text.clone()),
        );
    }

    async fn dispatch(&self, command: QueuedCommand) {
        if !self.control.lock().admits(command.epoch) {
            self.discard(&command);
            return;
        }

        let timeout = self.settings.timeouts.timeout_for(&command.text);
        let group_id = command.group.id();
        let out = OutputCommand::new(command.text.clone(), timeout).with_parent(command.group.clone());
        debug!(
            group = %group_id,
            timeout_ms = timeout.as_millis() as u64,
            "CommandProcessor {}: sending {:?}",
            self.kind, command.text
        );

        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX).max(1);
        self.counters
            .in_flight_timeout_ms
            .store(timeout_ms, Ordering::SeqCst);
        let sent = tokio::time::timeout(timeout, self.device.send(std::slice::from_ref(&out))).await;
        self.counters.in_flight_timeout_ms.store(0, Ordering::SeqCst);

        match sent {
            Ok(Ok(())) => {
                self.counters.dispatched.fetch_add(1, Ordering::SeqCst);
                self.emit(
                    command.group.source(),
                    &command.group,
                    EventType::CommandSent,
                    Some(command.text),
                );
            }
            Ok(Err(DeviceError::Cancelled)) => self.discard(&command),
            Ok(Err(e)) => {
                self.counters.failed.fetch_add(1, Ordering::SeqCst);
                warn!(
                    group = %group_id,
                    code = e.code(),
                    "CommandProcessor {}: {:?} failed: {}",
                    self.kind, command.text, e
                );
                self.emit(
                    SourceActor::Error,
                    &command.group,
                    EventType::CommandFailed,
                    Some(format!("{}: {}", command.text, e)),
                );
            }
            Err(_) => {
                self.counters.failed.fetch_add(1, Ordering::SeqCst);
                let err = DeviceError::Timeout(timeout);
                warn!(
                    group = %group_id,
                    code = err.code(),
                    "CommandProcessor {}: {:?} {}",
                    self.kind, command.text, err
                );
                self.emit(
                    SourceActor::Device,
                    &command.group,
                    EventType::DeviceTimeout,
                    Some(format!("{}: {}", command.text, err)),
                );
            }
        }
    }

    /// Dispatches a command already counted as in flight.
    async fn dispatch_tracked(&self, command: QueuedCommand, held: &HeldQueue) {
        let group = command.group.clone();
        self.dispatch(command).await;
        self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.complete_if_idle(held, &group);
    }

    /// Publishes `PROCESSING_COMPLETE` once nothing is left to do.
    fn complete_if_idle(&self, held: &HeldQueue, group: &EventGroup) {
        if held.is_empty() && self.counters.queued.load(Ordering::SeqCst) == 0 {
            debug!("CommandProcessor {}: queue drained", self.kind);
            self.emit(
                SourceActor::SystemSetup,
                group,
                EventType::ProcessingComplete,
                None,
            );
        }
    }

    async fn interrupt(&self, directive: Directive) {
        let Directive { command, group } = directive;
        let result = tokio::time::timeout(
            self.settings.interrupt_timeout,
            self.device.interrupt(command),
        )
        .await;

        match result {
            Ok(Ok(())) => {
                debug!(group = %group.id(), "CommandProcessor {}: {} delivered", self.kind, command);
                self.emit(
                    SourceActor::Device,
                    &group,
                    EventType::DeviceInterrupted,
                    Some(command.as_str().to_string()),
                );
            }
            Ok(Err(e)) => {
                warn!(group = %group.id(), "CommandProcessor {}: {} failed: {}", self.kind, command, e);
                self.emit(
                    SourceActor::Error,
                    &group,
                    EventType::CommandFailed,
                    Some(format!("{command}: {e}")),
                );
            }
            Err(_) => {
                let err = DeviceError::Timeout(self.settings.interrupt_timeout);
                warn!(group = %group.id(), "CommandProcessor {}: {} {}", self.kind, command, err);
                self.emit(
                    SourceActor::Device,
                    &group,
                    EventType::DeviceTimeout,
                    Some(format!("{command}: {err}")),
                );
            }
        }
    }
}

/// Consumer loop: the only place normal commands reach the device.
async fn consume(
    shared: Arc<Shared>,
    mut rx: mpsc::UnboundedReceiver<QueuedCommand>,
    mut shutdown: watch::Receiver<bool>,
) {
    let kind = shared.kind;
    let mut held = HeldQueue::new();

    loop {
        if *shutdown.borrow() {
            break;
        }

        match shared.state() {
            ProcessorState::Running if !held.is_empty() => {
                if let Some(command) = held.pop_front() {
                    shared.counters.in_flight.fetch_add(1, Ordering::SeqCst);
                    shared.set_held(held.len());
                    shared.dispatch_tracked(command, &held).await;
                }
                continue;
            }
            ProcessorState::Stopped if !held.is_empty() => {
                for command in held.drain(kind) {
                    shared.discard(&command);
                }
                shared.set_held(0);
            }
            _ => {}
        }

        tokio::select! {
            // Priority: shutdown, then state changes, then work
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }

            _ = shared.state_changed.notified() => {}

            next = rx.recv() => match next {
                // Counters move forward before the source count drops, so
                // a status snapshot never sees a command in no bucket.
                Some(command) => {
                    if shared.state() == ProcessorState::Paused || !held.is_empty() {
                        shared.emit(
                            command.group.source(),
                            &command.group,
                            EventType::CommandHeld,
                            Some(command.text.clone()),
                        );
                        held.push(command, kind);
                        shared.set_held(held.len());
                        shared.counters.queued.fetch_sub(1, Ordering::SeqCst);
                    } else {
                        shared.counters.in_flight.fetch_add(1, Ordering::SeqCst);
                        shared.counters.queued.fetch_sub(1, Ordering::SeqCst);
                        shared.dispatch_tracked(command, &held).await;
                    }
                }
                None => {
                    debug!("CommandProcessor {}: queue closed", kind);
                    break;
                }
            }
        }
    }

    debug!("CommandProcessor {}: consumer exited", kind);
}

/// Delivers priority directives to the device, in submission order.
async fn deliver_interrupts(
    shared: Arc<Shared>,
    mut rx: mpsc::UnboundedReceiver<Directive>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }

            next = rx.recv() => match next {
                Some(directive) => shared.interrupt(directive).await,
                None => break,
            }
        }
    }
    debug!("CommandProcessor {}: interrupt task exited", shared.kind);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingDevice;
    use keyrelay_event::Event;
    use tokio::sync::broadcast;

    fn setup(kind: DeviceKind) -> (CommandProcessor, Arc<RecordingDevice>, EventEmitter) {
        let device = Arc::new(RecordingDevice::new(kind));
        let emitter = EventEmitter::new(256);
        let processor = CommandProcessor::new(
            Arc::clone(&device) as Arc<dyn OutputDevice>,
            emitter.clone(),
            ProcessorSettings::default(),
        );
        (processor, device, emitter)
    }

    fn ctx(emitter: &EventEmitter, text: &str) -> EventGroup {
        EventGroup::from(emitter.new_root_context(
            SourceActor::Gui,
            CommandKind::classify(text),
            Some(text.to_string()),
        ))
    }

    fn submit(p: &CommandProcessor, emitter: &EventEmitter, text: &str) -> EventGroup {
        let group = ctx(emitter, text);
        p.enqueue(text, &group).unwrap();
        group
    }

    fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    #[tokio::test]
    async fn dispatches_in_order() {
        let (p, device, emitter) = setup(DeviceKind::Local);
        for i in 0..10 {
            submit(&p, &emitter, &format!("text:{i}"));
        }
        assert!(device.wait_for_sent(10, Duration::from_secs(2)).await);
        let expected: Vec<_> = (0..10).map(|i| format!("text:{i}")).collect();
        assert_eq!(device.sent(), expected);
        assert_eq!(p.status().dispatched, 10);
        p.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn queued_is_published_before_sent() {
        let (p, device, emitter) = setup(DeviceKind::Local);
        let mut rx = emitter.subscribe();
        let groups: Vec<_> = (0..20)
            .map(|i| submit(&p, &emitter, &format!("key:{i}")))
            .collect();
        assert!(device.wait_for_sent(20, Duration::from_secs(2)).await);
        tokio::time::sleep(Duration::from_millis(10)).await;

        let events = drain(&mut rx);
        let position = |id: keyrelay_types::GroupId, kind: EventType| {
            events
                .iter()
                .position(|e| e.parent_id == id && e.kind == kind)
        };
        for group in groups {
            let queued = position(group.id(), EventType::CommandQueued).unwrap();
            let sent = position(group.id(), EventType::CommandSent).unwrap();
            assert!(queued < sent, "{} sent before queued", group.id());
        }
        p.shutdown().await;
    }

    #[tokio::test]
    async fn priority_tokens_are_case_insensitive() {
        let (p, _device, emitter) = setup(DeviceKind::Local);
        submit(&p, &emitter, "pause");
        assert_eq!(p.state(), ProcessorState::Paused);
        submit(&p, &emitter, "Resume");
        assert_eq!(p.state(), ProcessorState::Running);
        submit(&p, &emitter, "STOP");
        assert_eq!(p.state(), ProcessorState::Stopped);
        p.shutdown().await;
    }

    #[tokio::test]
    async fn stop_forwards_directive_to_device() {
        let (p, device, emitter) = setup(DeviceKind::Serial);
        let mut rx = emitter.subscribe();
        let group = submit(&p, &emitter, "STOP");

        assert!(
            crate::testing::wait_until(Duration::from_secs(1), || !device.interrupts().is_empty())
                .await
        );
        assert_eq!(device.interrupts(), vec![PriorityCommand::Stop]);

        tokio::time::sleep(Duration::from_millis(10)).await;
        let kinds: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter(|e| e.parent_id == group.id())
            .map(|e| e.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                EventType::PriorityReceived,
                EventType::StateChanged,
                EventType::DeviceInterrupted
            ]
        );
        p.shutdown().await;
    }

    #[tokio::test]
    async fn reset_unsupported_is_reported() {
        let (p, device, emitter) = setup(DeviceKind::LogSink);
        let group = ctx(&emitter, "RESET");
        let err = p.reset(&group).unwrap_err();
        assert_eq!(err.code(), "PROCESSOR_DEVICE");
        assert!(device.interrupts().is_empty());
        assert_eq!(p.state(), ProcessorState::Running);
        p.shutdown().await;
    }

    #[tokio::test]
    async fn failing_device_does_not_stop_the_loop() {
        let (p, device, emitter) = setup(DeviceKind::Local);
        let mut rx = emitter.subscribe();
        device.set_failing(true);
        let bad = submit(&p, &emitter, "key:A");

        assert!(
            crate::testing::wait_until(Duration::from_secs(1), || p.status().failed == 1).await
        );
        device.set_failing(false);
        submit(&p, &emitter, "key:B");
        assert!(device.wait_for_sent(1, Duration::from_secs(1)).await);
        assert_eq!(device.sent(), vec!["key:B"]);

        let failed: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter(|e| e.kind == EventType::CommandFailed)
            .collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].parent_id, bad.id());
        p.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn slow_device_times_out() {
        let device = Arc::new(RecordingDevice::new(DeviceKind::Local));
        device.set_delay(Duration::from_secs(10));
        let emitter = EventEmitter::new(64);
        let mut rx = emitter.subscribe();
        let p = CommandProcessor::new(
            Arc::clone(&device) as Arc<dyn OutputDevice>,
            emitter.clone(),
            ProcessorSettings::default(),
        );

        submit(&p, &emitter, "key:A");
        tokio::time::sleep(Duration::from_millis(1100)).await;

        assert_eq!(p.status().failed, 1);
        assert!(drain(&mut rx)
            .iter()
            .any(|e| e.kind == EventType::DeviceTimeout));
        p.shutdown().await;
    }

    #[tokio::test]
    async fn processing_complete_after_queue_drains() {
        let (p, device, emitter) = setup(DeviceKind::Local);
        let mut rx = emitter.subscribe();
        submit(&p, &emitter, "key:A");
        let last = submit(&p, &emitter, "key:B");
        assert!(device.wait_for_sent(2, Duration::from_secs(1)).await);
        tokio::time::sleep(Duration::from_millis(10)).await;

        let complete: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter(|e| e.kind == EventType::ProcessingComplete)
            .collect();
        assert_eq!(complete.len(), 1);
        assert_eq!(complete[0].parent_id, last.id());
        p.shutdown().await;
    }

    #[tokio::test]
    async fn enqueue_after_shutdown_is_closed() {
        let (p, device, emitter) = setup(DeviceKind::Local);
        p.shutdown().await;
        let group = ctx(&emitter, "key:A");
        assert!(matches!(
            p.enqueue("key:A", &group),
            Err(ProcessorError::Closed)
        ));
        assert!(matches!(p.stop(&group), Err(ProcessorError::Closed)));
        assert_eq!(device.shutdown_count(), 1);
        assert!(p.status().closed);
    }

    #[tokio::test]
    async fn is_using_device_matches_kind() {
        let (p, _device, _emitter) = setup(DeviceKind::Serial);
        assert!(p.is_using_device(DeviceKind::Serial));
        assert!(!p.is_using_device(DeviceKind::Local));
        assert!(p.supports_reset());
        p.shutdown().await;
    }

    #[tokio::test]
    async fn status_tracks_in_flight_send() {
        let (p, device, emitter) = setup(DeviceKind::Local);
        assert!(p.status().is_idle());
        device.set_delay(Duration::from_millis(200));
        submit(&p, &emitter, "key:A");

        assert!(crate::testing::wait_until(Duration::from_secs(1), || p.status().in_flight == 1).await);
        assert!(!p.status().is_idle());
        assert!(crate::testing::wait_until(Duration::from_secs(1), || p.status().in_flight_timeout.is_some()).await);
        assert_eq!(p.status().in_flight_timeout, Some(Duration::from_millis(1000)));
        assert!(crate::testing::wait_until(Duration::from_secs(1), || p.status().is_idle()).await);
        assert_eq!(p.status().in_flight_timeout, None);
        assert_eq!(device.sent(), vec!["key:A"]);
        p.shutdown().await;
    }

    #[tokio::test]
    async fn paused_backlog_counts_as_idle() {
        let (p, _device, emitter) = setup(DeviceKind::Local);
        p.pause(&ctx(&emitter, "PAUSE")).unwrap();
        submit(&p, &emitter, "key:A");
        assert!(crate::testing::wait_until(Duration::from_secs(1), || p.status().held == 1).await);
        assert!(p.status().is_idle());
        p.shutdown().await;
    }
}
