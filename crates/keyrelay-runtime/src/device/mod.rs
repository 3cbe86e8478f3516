//! Output devices.
//!
//! An [`OutputDevice`] is the backend that finally acts on keyboard
//! commands. Exactly one command processor drives each device.
//!
//! # Variants
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        OutputDevice                              │
//! │  send / pause / stop_and_clear / resume / reset / interrupt      │
//! ├──────────────────┬─────────────────────┬─────────────────────────┤
//! │  SerialDevice    │  LocalKeyboard      │  LogSinkDevice          │
//! │  transport +     │  in-process key     │  JSON lines file,       │
//! │  busy/ready      │  injector, typing   │  flags only             │
//! │  flow control    │  delay emulation    │                         │
//! └──────────────────┴─────────────────────┴─────────────────────────┘
//! ```
//!
//! Capabilities are queried, never downcast: the processor asks
//! [`OutputDevice::kind`] and [`OutputDevice::supports_reset`].
//!
//! # In-flight sends on shutdown
//!
//! | Device | Behaviour |
//! |--------|-----------|
//! | serial | a send waiting for readiness fails with `DEVICE_CLOSED`; a write in progress completes |
//! | local | typing is cancelled between key strokes |
//! | log_sink | a write in progress completes |

mod error;
pub mod layout;
pub mod local;
pub mod log_sink;
pub mod serial;

pub use error::DeviceError;
pub use layout::{KeyLayout, KeyStroke, Modifiers};
pub use local::{KeyInjector, LocalKeyboard, TracingInjector};
pub use log_sink::LogSinkDevice;
pub use serial::{Connector, DeviceFileConnector, SerialDevice, SerialSettings, TcpConnector};

use async_trait::async_trait;
use keyrelay_event::{EventGroup, PriorityCommand};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Which backend a device is.
///
/// # Example
///
/// ```
/// use keyrelay_runtime::DeviceKind;
///
/// assert_eq!("Serial".parse::<DeviceKind>(), Ok(DeviceKind::Serial));
/// assert_eq!("log-sink".parse::<DeviceKind>(), Ok(DeviceKind::LogSink));
/// assert_eq!(DeviceKind::Local.to_string(), "local");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    /// Remote keyboard emulator behind a serial or network transport.
    Serial,
    /// In-process key injector.
    Local,
    /// Durable file of submitted commands.
    LogSink,
}

impl DeviceKind {
    pub const ALL: [DeviceKind; 3] = [Self::Serial, Self::Local, Self::LogSink];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Serial => "serial",
            Self::Local => "local",
            Self::LogSink => "log_sink",
        }
    }
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| format!("unknown device kind: {s}"))
    }
}

/// A normal command ready for dispatch.
///
/// Created by the processor right before it calls [`OutputDevice::send`]
/// and discarded afterwards.
#[derive(Debug, Clone)]
pub struct OutputCommand {
    pub text: String,
    /// Deadline for the whole command, including any wait for readiness.
    pub timeout: Duration,
    /// Causal group the command belongs to.
    pub parent: Option<EventGroup>,
}

impl OutputCommand {
    #[must_use]
    pub fn new(text: impl Into<String>, timeout: Duration) -> Self {
        Self {
            text: text.into(),
            timeout,
            parent: None,
        }
    }

    #[must_use]
    pub fn with_parent(mut self, parent: EventGroup) -> Self {
        self.parent = Some(parent);
        self
    }
}

/// Backend that acts on keyboard commands.
///
/// Every method may be called concurrently with the device's own
/// background work. `send` is only ever called by one task at a time
/// (the owning processor), while the control methods may race with it.
#[async_trait]
pub trait OutputDevice: Send + Sync {
    fn kind(&self) -> DeviceKind;

    /// Whether [`reset`](Self::reset) does anything.
    fn supports_reset(&self) -> bool {
        false
    }

    /// Delivers normal commands, in order.
    ///
    /// # Errors
    ///
    /// Transport failures, cancellation by a concurrent stop, or a closed
    /// device. Deadlines are enforced by the caller.
    async fn send(&self, commands: &[OutputCommand]) -> Result<(), DeviceError>;

    /// Asks the device to stop acting on new commands.
    async fn pause(&self) -> Result<(), DeviceError>;

    /// Stops the device and discards anything buffered.
    ///
    /// Once this returns, nothing handed to `send` before the call is
    /// delivered downstream.
    async fn stop_and_clear(&self) -> Result<(), DeviceError>;

    /// Resumes after `pause` or `stop_and_clear`.
    async fn resume(&self) -> Result<(), DeviceError>;

    /// Reinitializes the device.
    ///
    /// # Errors
    ///
    /// [`DeviceError::Unsupported`] unless [`supports_reset`](Self::supports_reset).
    async fn reset(&self) -> Result<(), DeviceError> {
        Err(DeviceError::unsupported(self.kind().as_str(), "reset"))
    }

    /// Delivers a priority directive, bypassing any flow control.
    async fn interrupt(&self, command: PriorityCommand) -> Result<(), DeviceError> {
        match command {
            PriorityCommand::Stop => self.stop_and_clear().await,
            PriorityCommand::Pause => self.pause().await,
            PriorityCommand::Resume => self.resume().await,
            PriorityCommand::Reset => self.reset().await,
        }
    }

    /// Releases every resource the device holds. Idempotent.
    async fn shutdown(&self) -> Result<(), DeviceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_kind_parse() {
        assert_eq!("LOCAL".parse::<DeviceKind>(), Ok(DeviceKind::Local));
        assert_eq!(" log_sink ".parse::<DeviceKind>(), Ok(DeviceKind::LogSink));
        assert!("arduino".parse::<DeviceKind>().is_err());
    }

    #[test]
    fn device_kind_serde_matches_as_str() {
        for kind in DeviceKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn output_command_builder() {
        let cmd = OutputCommand::new("key:ENTER", Duration::from_millis(50));
        assert!(cmd.parent.is_none());
        assert_eq!(cmd.text, "key:ENTER");
    }
}
