//! Command processor errors.
//!
//! # Error Codes
//!
//! | Variant | Code | Recoverable |
//! |---------|------|-------------|
//! | [`ProcessorError::Closed`] | `PROCESSOR_CLOSED` | No |
//! | [`ProcessorError::AdapterUnavailable`] | `PROCESSOR_ADAPTER_UNAVAILABLE` | No |
//! | [`ProcessorError::Device`] | `PROCESSOR_DEVICE` | as the device error |
//!
//! `Closed` and `AdapterUnavailable` are returned synchronously to the
//! submitter. Failures of individual commands never are; they only show up
//! in the event trail.

use crate::device::{DeviceError, DeviceKind};
use keyrelay_types::ErrorCode;
use thiserror::Error;

/// Error returned by the processor and the command service.
///
/// # Example
///
/// ```
/// use keyrelay_runtime::{DeviceKind, ProcessorError};
/// use keyrelay_types::ErrorCode;
///
/// let err = ProcessorError::AdapterUnavailable(DeviceKind::Serial);
/// assert_eq!(err.code(), "PROCESSOR_ADAPTER_UNAVAILABLE");
/// assert!(!err.is_recoverable());
/// ```
#[derive(Debug, Clone, Error)]
pub enum ProcessorError {
    /// The processor has been shut down.
    #[error("command processor is closed")]
    Closed,

    /// The selected mode has no configured device.
    #[error("no output device configured for mode {0}")]
    AdapterUnavailable(DeviceKind),

    /// A control call was rejected by the device.
    #[error(transparent)]
    Device(#[from] DeviceError),
}

impl ErrorCode for ProcessorError {
    fn code(&self) -> &'static str {
        match self {
            Self::Closed => "PROCESSOR_CLOSED",
            Self::AdapterUnavailable(_) => "PROCESSOR_ADAPTER_UNAVAILABLE",
            Self::Device(_) => "PROCESSOR_DEVICE",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            Self::Device(e) => e.is_recoverable(),
            Self::Closed | Self::AdapterUnavailable(_) => false,
        }
    }
}
