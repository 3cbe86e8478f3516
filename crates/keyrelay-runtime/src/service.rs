//! Command service - the router in front of the processors.
//!
//! Input adapters never talk to a processor directly. They hand text to
//! the [`CommandService`], which creates the causal group through the
//! emitter, publishes `COMMAND_RECEIVED` / `BATCH_RECEIVED`, and enqueues
//! on the processor of the active mode.
//!
//! ```text
//! console ─┐
//! watcher ─┼─► CommandService ──mode──► CommandProcessor(serial)
//! gui ─────┘        │                   CommandProcessor(local)
//!                   └─► EventEmitter    CommandProcessor(log_sink)
//! ```

use crate::device::{DeviceKind, OutputDevice};
use crate::processor::{CommandProcessor, ProcessorError, ProcessorSettings, ProcessorStatus};
use keyrelay_event::{CommandKind, EventEmitter, EventGroup, EventType, PriorityCommand};
use keyrelay_types::SourceActor;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Builder for [`CommandService`].
///
/// # Example
///
/// ```
/// use keyrelay_runtime::{CommandService, DeviceKind, LogSinkDevice};
/// use keyrelay_types::SourceActor;
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let path = std::env::temp_dir().join("keyrelay-doc-service.jsonl");
/// let service = CommandService::builder(DeviceKind::LogSink)
///     .with_device(Arc::new(LogSinkDevice::new(path)))
///     .build();
///
/// assert!(service.is_using_device(DeviceKind::LogSink));
/// service.submit_command(SourceActor::CommandLine, "text:hi").unwrap();
/// service.shutdown().await;
/// # }
/// ```
pub struct CommandServiceBuilder {
    mode: DeviceKind,
    devices: Vec<Arc<dyn OutputDevice>>,
    emitter: Option<EventEmitter>,
    settings: ProcessorSettings,
}

impl CommandServiceBuilder {
    #[must_use]
    pub fn new(mode: DeviceKind) -> Self {
        Self {
            mode,
            devices: Vec::new(),
            emitter: None,
            settings: ProcessorSettings::default(),
        }
    }

    /// Adds a device. A later device of the same kind replaces an earlier one.
    #[must_use]
    pub fn with_device(mut self, device: Arc<dyn OutputDevice>) -> Self {
        self.devices.push(device);
        self
    }

    /// Uses a shared emitter instead of a fresh one.
    #[must_use]
    pub fn with_emitter(mut self, emitter: EventEmitter) -> Self {
        self.emitter = Some(emitter);
        self
    }

    #[must_use]
    pub fn with_settings(mut self, settings: ProcessorSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Starts one processor per device.
    ///
    /// A mode without a device is accepted here; requests against it fail
    /// with [`ProcessorError::AdapterUnavailable`].
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn build(self) -> CommandService {
        let emitter = self.emitter.unwrap_or_default();
        let mut processors: HashMap<DeviceKind, Arc<CommandProcessor>> = HashMap::new();

        for device in self.devices {
            let kind = device.kind();
            let processor = CommandProcessor::new(device, emitter.clone(), self.settings);
            if processors.insert(kind, Arc::new(processor)).is_some() {
                warn!("CommandService: second {} device replaces the first", kind);
            }
        }

        if !processors.contains_key(&self.mode) {
            warn!("CommandService: no device configured for mode {}", self.mode);
        }
        info!(
            mode = %self.mode,
            devices = processors.len(),
            "CommandService started"
        );

        CommandService {
            processors,
            mode: RwLock::new(self.mode),
            emitter,
            closed: AtomicBool::new(false),
        }
    }
}

/// Routes commands from input adapters to the active processor.
pub struct CommandService {
    processors: HashMap<DeviceKind, Arc<CommandProcessor>>,
    mode: RwLock<DeviceKind>,
    emitter: EventEmitter,
    closed: AtomicBool,
}

impl CommandService {
    #[must_use]
    pub fn builder(mode: DeviceKind) -> CommandServiceBuilder {
        CommandServiceBuilder::new(mode)
    }

    #[must_use]
    pub fn emitter(&self) -> &EventEmitter {
        &self.emitter
    }

    #[must_use]
    pub fn mode(&self) -> DeviceKind {
        *self.mode.read()
    }

    /// Device kinds that have a processor, in a stable order.
    #[must_use]
    pub fn kinds(&self) -> Vec<DeviceKind> {
        DeviceKind::ALL
            .into_iter()
            .filter(|kind| self.processors.contains_key(kind))
            .collect()
    }

    /// Switches the active mode.
    ///
    /// Commands already queued on the previous processor still run there.
    ///
    /// # Errors
    ///
    /// [`ProcessorError::AdapterUnavailable`] if `kind` has no device.
    pub fn set_mode(&self, kind: DeviceKind) -> Result<(), ProcessorError> {
        if !self.processors.contains_key(&kind) {
            return Err(ProcessorError::AdapterUnavailable(kind));
        }
        let previous = std::mem::replace(&mut *self.mode.write(), kind);
        if previous != kind {
            info!("CommandService: mode {} -> {}", previous, kind);
        }
        Ok(())
    }

    /// Returns the processor of the given kind.
    ///
    /// # Errors
    ///
    /// [`ProcessorError::AdapterUnavailable`] if `kind` has no device.
    pub fn processor(&self, kind: DeviceKind) -> Result<Arc<CommandProcessor>, ProcessorError> {
        self.processors
            .get(&kind)
            .cloned()
            .ok_or(ProcessorError::AdapterUnavailable(kind))
    }

    /// Returns the processor of the active mode.
    ///
    /// # Errors
    ///
    /// [`ProcessorError::AdapterUnavailable`] if the mode has no device.
    pub fn active_processor(&self) -> Result<Arc<CommandProcessor>, ProcessorError> {
        self.processor(self.mode())
    }

    /// Whether the active processor drives a device of this kind.
    #[must_use]
    pub fn is_using_device(&self, kind: DeviceKind) -> bool {
        self.active_processor()
            .map(|p| p.is_using_device(kind))
            .unwrap_or(false)
    }

    /// Creates a root context for `text` and enqueues it.
    ///
    /// # Errors
    ///
    /// [`ProcessorError::AdapterUnavailable`] or [`ProcessorError::Closed`];
    /// also the control error when `text` is a priority token.
    pub fn submit_command(
        &self,
        actor: SourceActor,
        text: &str,
    ) -> Result<EventGroup, ProcessorError> {
        let processor = self.active_processor()?;
        let group = EventGroup::from(self.emitter.new_root_context(
            actor,
            CommandKind::classify(text),
            Some(text.to_string()),
        ));
        debug!(group = %group.id(), actor = %actor, "CommandService: received {:?}", text);
        self.emitter.emit(
            actor,
            &group,
            EventType::CommandReceived,
            Some(text.to_string()),
        );
        processor.enqueue(text, &group)?;
        Ok(group)
    }

    /// Creates one batch with a context per non-blank line and enqueues
    /// the lines in order.
    ///
    /// Returns the batch group. A line whose priority control fails (RESET
    /// on a device without reset) does not stop the batch: the remaining
    /// lines are still enqueued.
    ///
    /// # Errors
    ///
    /// [`ProcessorError::AdapterUnavailable`] before anything is enqueued,
    /// [`ProcessorError::Closed`] as soon as the processor is gone, or else
    /// the first per-line control error once every line is enqueued.
    pub fn submit_batch<I, S>(&self, actor: SourceActor, lines: I) -> Result<EventGroup, ProcessorError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let processor = self.active_processor()?;
        let lines: Vec<String> = lines
            .into_iter()
            .map(|line| line.as_ref().trim_end_matches(['\r', '\n']).to_string())
            .collect();

        let batch = self.emitter.new_batch(actor, Some(lines.join("\n")));
        let batch_group = EventGroup::from(Arc::clone(&batch));
        let commands: Vec<&String> = lines.iter().filter(|l| !l.trim().is_empty()).collect();
        debug!(group = %batch.id(), actor = %actor, "CommandService: received batch of {}", commands.len());
        self.emitter.emit(
            actor,
            &batch_group,
            EventType::BatchReceived,
            Some(commands.len().to_string()),
        );

        let mut first_error = None;
        for line in commands {
            let ctx = self.emitter.new_context_in_batch(
                &batch,
                actor,
                CommandKind::classify(line),
                Some(line.clone()),
            );
            let group = EventGroup::from(ctx);
            self.emitter
                .emit(actor, &group, EventType::CommandReceived, Some(line.clone()));
            match processor.enqueue(line, &group) {
                Ok(()) => {}
                Err(ProcessorError::Closed) => return Err(ProcessorError::Closed),
                Err(e) => {
                    debug!(group = %group.id(), "CommandService: batch line failed: {}", e);
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(batch_group),
        }
    }

    pub fn stop(&self, actor: SourceActor) -> Result<EventGroup, ProcessorError> {
        self.control(actor, PriorityCommand::Stop)
    }

    pub fn pause(&self, actor: SourceActor) -> Result<EventGroup, ProcessorError> {
        self.control(actor, PriorityCommand::Pause)
    }

    pub fn resume(&self, actor: SourceActor) -> Result<EventGroup, ProcessorError> {
        self.control(actor, PriorityCommand::Resume)
    }

    /// # Errors
    ///
    /// Fails with `DEVICE_UNSUPPORTED` (wrapped) when the active device
    /// cannot reset.
    pub fn reset(&self, actor: SourceActor) -> Result<EventGroup, ProcessorError> {
        self.control(actor, PriorityCommand::Reset)
    }

    fn control(
        &self,
        actor: SourceActor,
        command: PriorityCommand,
    ) -> Result<EventGroup, ProcessorError> {
        let processor = self.active_processor()?;
        let group = EventGroup::from(self.emitter.new_root_context(
            actor,
            command.into(),
            Some(command.as_str().to_string()),
        ));
        self.emitter.emit(
            actor,
            &group,
            EventType::CommandReceived,
            Some(command.as_str().to_string()),
        );
        processor.control(command, &group)?;
        Ok(group)
    }

    /// Status of the active processor.
    ///
    /// # Errors
    ///
    /// [`ProcessorError::AdapterUnavailable`] if the mode has no device.
    pub fn status(&self) -> Result<ProcessorStatus, ProcessorError> {
        self.active_processor().map(|p| p.status())
    }

    /// Shuts every processor (and with it every device) down. Idempotent.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            debug!("CommandService: already shut down");
            return;
        }
        info!("CommandService: shutting down {} processors", self.processors.len());
        for kind in self.kinds() {
            if let Some(processor) = self.processors.get(&kind) {
                processor.shutdown().await;
            }
        }
    }
}

impl std::fmt::Debug for CommandService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandService")
            .field("mode", &self.mode())
            .field("kinds", &self.kinds())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingDevice;
    use keyrelay_types::ErrorCode;
    use std::time::Duration;

    fn service_with(kinds: &[DeviceKind], mode: DeviceKind) -> (CommandService, Vec<Arc<RecordingDevice>>) {
        let devices: Vec<_> = kinds
            .iter()
            .map(|k| Arc::new(RecordingDevice::new(*k)))
            .collect();
        let mut builder = CommandService::builder(mode);
        for device in &devices {
            builder = builder.with_device(Arc::clone(device) as Arc<dyn OutputDevice>);
        }
        (builder.build(), devices)
    }

    #[tokio::test]
    async fn missing_mode_is_adapter_unavailable() {
        let (service, _) = service_with(&[DeviceKind::Local], DeviceKind::Serial);
        let err = service
            .submit_command(SourceActor::Web, "key:A")
            .unwrap_err();
        assert_eq!(err.code(), "PROCESSOR_ADAPTER_UNAVAILABLE");
        assert!(service.active_processor().is_err());
        assert!(!service.is_using_device(DeviceKind::Serial));
        service.shutdown().await;
    }

    #[tokio::test]
    async fn routes_to_active_mode() {
        let (service, devices) =
            service_with(&[DeviceKind::Local, DeviceKind::LogSink], DeviceKind::Local);
        service.submit_command(SourceActor::Gui, "key:A").unwrap();
        assert!(devices[0].wait_for_sent(1, Duration::from_secs(1)).await);

        service.set_mode(DeviceKind::LogSink).unwrap();
        assert!(service.is_using_device(DeviceKind::LogSink));
        service.submit_command(SourceActor::Gui, "key:B").unwrap();
        assert!(devices[1].wait_for_sent(1, Duration::from_secs(1)).await);

        assert_eq!(devices[0].sent(), vec!["key:A"]);
        assert_eq!(devices[1].sent(), vec!["key:B"]);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn set_mode_rejects_unknown_device() {
        let (service, _) = service_with(&[DeviceKind::Local], DeviceKind::Local);
        assert!(service.set_mode(DeviceKind::Serial).is_err());
        assert_eq!(service.mode(), DeviceKind::Local);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn batch_skips_blank_lines() {
        let (service, devices) = service_with(&[DeviceKind::Local], DeviceKind::Local);
        let group = service
            .submit_batch(SourceActor::FileWatcher, ["text:a", "", "   ", "text:b\r"])
            .unwrap();

        let batch = group.as_batch().unwrap();
        assert_eq!(batch.len(), 2);
        assert!(devices[0].wait_for_sent(2, Duration::from_secs(1)).await);
        assert_eq!(devices[0].sent(), vec!["text:a", "text:b"]);
        assert_eq!(
            devices[0].sent_parents(),
            batch.member_ids().into_iter().map(Some).collect::<Vec<_>>()
        );
        service.shutdown().await;
    }

    #[tokio::test]
    async fn failing_batch_line_does_not_stop_the_batch() {
        let (service, devices) = service_with(&[DeviceKind::LogSink], DeviceKind::LogSink);
        let err = service
            .submit_batch(SourceActor::FileWatcher, ["text:a", "RESET", "text:b"])
            .unwrap_err();

        assert_eq!(err.code(), "PROCESSOR_DEVICE");
        assert!(devices[0].wait_for_sent(2, Duration::from_secs(1)).await);
        assert_eq!(devices[0].sent(), vec!["text:a", "text:b"]);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn control_surface_changes_state() {
        let (service, devices) = service_with(&[DeviceKind::Serial], DeviceKind::Serial);
        service.pause(SourceActor::Web).unwrap();
        assert_eq!(service.status().unwrap().state, crate::ProcessorState::Paused);
        service.resume(SourceActor::Web).unwrap();
        service.reset(SourceActor::Web).unwrap();
        service.stop(SourceActor::Web).unwrap();
        assert_eq!(service.status().unwrap().state, crate::ProcessorState::Stopped);

        assert!(
            crate::testing::wait_until(Duration::from_secs(1), || devices[0].interrupts().len() == 4)
                .await
        );
        assert_eq!(
            devices[0].interrupts(),
            vec![
                PriorityCommand::Pause,
                PriorityCommand::Resume,
                PriorityCommand::Reset,
                PriorityCommand::Stop
            ]
        );
        service.shutdown().await;
    }

    #[tokio::test]
    async fn reset_on_local_without_reset_fails() {
        let device = Arc::new(RecordingDevice::new(DeviceKind::Local).with_reset(false));
        let service = CommandService::builder(DeviceKind::Local)
            .with_device(device as Arc<dyn OutputDevice>)
            .build();
        let err = service.reset(SourceActor::Gui).unwrap_err();
        assert_eq!(err.code(), "PROCESSOR_DEVICE");
        service.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let (service, devices) =
            service_with(&[DeviceKind::Local, DeviceKind::Serial], DeviceKind::Local);
        service.shutdown().await;
        service.shutdown().await;
        for device in &devices {
            assert_eq!(device.shutdown_count(), 1);
        }
        assert!(matches!(
            service.submit_command(SourceActor::Web, "key:A"),
            Err(ProcessorError::Closed)
        ));
    }
}
