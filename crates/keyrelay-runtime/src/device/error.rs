//! Output device errors.
//!
//! # Error Codes
//!
//! | Variant | Code | Recoverable |
//! |---------|------|-------------|
//! | [`DeviceError::Timeout`] | `DEVICE_TIMEOUT` | Yes |
//! | [`DeviceError::Transport`] | `DEVICE_TRANSPORT` | Yes |
//! | [`DeviceError::Unsupported`] | `DEVICE_UNSUPPORTED` | No |
//! | [`DeviceError::NotConnected`] | `DEVICE_NOT_CONNECTED` | Yes |
//! | [`DeviceError::Cancelled`] | `DEVICE_CANCELLED` | No |
//! | [`DeviceError::Closed`] | `DEVICE_CLOSED` | No |
//! | [`DeviceError::InvalidCommand`] | `DEVICE_INVALID_COMMAND` | No |
//!
//! None of these errors stop a command processor. They are logged with
//! the causal group id and published as events.

use keyrelay_types::ErrorCode;
use std::time::Duration;
use thiserror::Error;

/// Failure talking to an output device.
///
/// # Example
///
/// ```
/// use keyrelay_runtime::DeviceError;
/// use keyrelay_types::ErrorCode;
/// use std::time::Duration;
///
/// let err = DeviceError::Timeout(Duration::from_millis(1000));
/// assert_eq!(err.code(), "DEVICE_TIMEOUT");
/// assert!(err.is_recoverable());
/// ```
#[derive(Debug, Clone, Error)]
pub enum DeviceError {
    /// The command did not complete before its deadline.
    #[error("device timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// I/O failure on the transport.
    #[error("transport error: {0}")]
    Transport(String),

    /// The device has no such primitive (e.g. RESET on a log sink).
    #[error("operation not supported by {device}: {operation}")]
    Unsupported {
        device: &'static str,
        operation: &'static str,
    },

    /// The transport has not been opened yet, or was lost.
    #[error("device not connected")]
    NotConnected,

    /// A STOP cleared the device while this command was waiting.
    #[error("command cancelled by stop")]
    Cancelled,

    /// The device has been shut down.
    #[error("device closed")]
    Closed,

    /// The device cannot interpret the command text.
    #[error("invalid command: {0}")]
    InvalidCommand(String),
}

impl DeviceError {
    /// Wraps an I/O error as a transport failure.
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }

    pub fn unsupported(device: &'static str, operation: &'static str) -> Self {
        Self::Unsupported { device, operation }
    }
}

impl From<std::io::Error> for DeviceError {
    fn from(err: std::io::Error) -> Self {
        Self::transport(err)
    }
}

impl ErrorCode for DeviceError {
    fn code(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "DEVICE_TIMEOUT",
            Self::Transport(_) => "DEVICE_TRANSPORT",
            Self::Unsupported { .. } => "DEVICE_UNSUPPORTED",
            Self::NotConnected => "DEVICE_NOT_CONNECTED",
            Self::Cancelled => "DEVICE_CANCELLED",
            Self::Closed => "DEVICE_CLOSED",
            Self::InvalidCommand(_) => "DEVICE_INVALID_COMMAND",
        }
    }

    fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Transport(_) | Self::NotConnected
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyrelay_types::assert_error_codes;

    fn all_variants() -> Vec<DeviceError> {
        vec![
            DeviceError::Timeout(Duration::from_millis(5)),
            DeviceError::transport("broken pipe"),
            DeviceError::unsupported("log_sink", "reset"),
            DeviceError::NotConnected,
            DeviceError::Cancelled,
            DeviceError::Closed,
            DeviceError::InvalidCommand("key:HYPER".into()),
        ]
    }

    #[test]
    fn all_error_codes_valid() {
        assert_error_codes(&all_variants(), "DEVICE_");
    }

    #[test]
    fn recoverability() {
        assert!(DeviceError::NotConnected.is_recoverable());
        assert!(!DeviceError::Cancelled.is_recoverable());
        assert!(!DeviceError::unsupported("local", "reset").is_recoverable());
    }

    #[test]
    fn io_error_maps_to_transport() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe gone");
        let err = DeviceError::from(io);
        assert_eq!(err.code(), "DEVICE_TRANSPORT");
        assert!(err.to_string().contains("pipe gone"));
    }

    #[test]
    fn timeout_display_in_millis() {
        let err = DeviceError::Timeout(Duration::from_millis(1500));
        assert_eq!(err.to_string(), "device timed out after 1500ms");
    }
}
