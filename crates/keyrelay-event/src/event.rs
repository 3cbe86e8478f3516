//! Observable facts.
//!
//! An [`Event`] is a leaf record: it is created, published once, and then
//! belongs to whichever listeners received it. The core does not keep
//! events around.

use chrono::{DateTime, Utc};
use keyrelay_types::{EventId, GroupId, SourceActor};
use serde::{Deserialize, Serialize};

/// Stable classification of an event.
///
/// The serialized names (`COMMAND_SENT`, ...) are part of the observability
/// contract; listeners may match on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// An input adapter handed a command to the core.
    CommandReceived,
    /// An input adapter handed a multi-line batch to the core.
    BatchReceived,
    /// A normal command entered a processor queue.
    CommandQueued,
    /// A normal command was held back because the processor is paused.
    CommandHeld,
    /// A normal command was delivered to the output device.
    CommandSent,
    /// A normal command was discarded because the processor was stopped.
    CommandIgnored,
    /// The output device rejected a normal command.
    CommandFailed,
    /// A normal command did not complete before its deadline.
    DeviceTimeout,
    /// Raw data written to a device.
    DeviceDataSent,
    /// Raw telemetry read back from a device.
    DeviceDataReceived,
    /// A priority command was accepted.
    PriorityReceived,
    /// The processor changed state (data holds `OLD->NEW`).
    StateChanged,
    /// A priority directive reached the output device.
    DeviceInterrupted,
    /// The processor queue became empty after work was done.
    ProcessingComplete,
    /// The processor was shut down.
    ProcessorShutdown,
}

impl EventType {
    /// Returns the stable wire name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CommandReceived => "COMMAND_RECEIVED",
            Self::BatchReceived => "BATCH_RECEIVED",
            Self::CommandQueued => "COMMAND_QUEUED",
            Self::CommandHeld => "COMMAND_HELD",
            Self::CommandSent => "COMMAND_SENT",
            Self::CommandIgnored => "COMMAND_IGNORED",
            Self::CommandFailed => "COMMAND_FAILED",
            Self::DeviceTimeout => "DEVICE_TIMEOUT",
            Self::DeviceDataSent => "DEVICE_DATA_SENT",
            Self::DeviceDataReceived => "DEVICE_DATA_RECEIVED",
            Self::PriorityReceived => "PRIORITY_RECEIVED",
            Self::StateChanged => "STATE_CHANGED",
            Self::DeviceInterrupted => "DEVICE_INTERRUPTED",
            Self::ProcessingComplete => "PROCESSING_COMPLETE",
            Self::ProcessorShutdown => "PROCESSOR_SHUTDOWN",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observable fact, linked to the group that caused it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    /// Who produced the fact.
    pub source: SourceActor,
    pub kind: EventType,
    /// Free-form detail (command text, error message, telemetry line).
    pub data: Option<String>,
    /// Id of the owning [`EventGroup`](crate::EventGroup).
    pub parent_id: GroupId,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub(crate) fn new(
        source: SourceActor,
        parent_id: GroupId,
        kind: EventType,
        data: Option<String>,
    ) -> Self {
        Self {
            id: EventId::new(),
            source,
            kind,
            data,
            parent_id,
            timestamp: Utc::now(),
        }
    }

    /// Returns `true` if this event has the given type.
    #[must_use]
    pub fn is(&self, kind: EventType) -> bool {
        self.kind == kind
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {} parent={}", self.source, self.kind, self.parent_id)?;
        if let Some(data) = &self.data {
            write!(f, " data={data:?}")?;
        }
        Ok(())
    }
}
