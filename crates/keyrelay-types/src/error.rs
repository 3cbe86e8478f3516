//! Unified error interface for keyrelay.
//!
//! Every error enum in the workspace implements [`ErrorCode`] so that
//! input adapters can map failures to their own surface (HTTP status,
//! GUI log line, exit code) without matching on concrete types.
//!
//! # Example
//!
//! ```
//! use keyrelay_types::ErrorCode;
//!
//! #[derive(Debug)]
//! enum LinkError {
//!     Dropped,
//!     Refused,
//! }
//!
//! impl ErrorCode for LinkError {
//!     fn code(&self) -> &'static str {
//!         match self {
//!             Self::Dropped => "LINK_DROPPED",
//!             Self::Refused => "LINK_REFUSED",
//!         }
//!     }
//!
//!     fn is_recoverable(&self) -> bool {
//!         matches!(self, Self::Dropped)
//!     }
//! }
//!
//! assert_eq!(LinkError::Dropped.code(), "LINK_DROPPED");
//! assert!(!LinkError::Refused.is_recoverable());
//! ```

/// Machine-readable error classification.
///
/// # Code Format
///
/// - **UPPER_SNAKE_CASE**, e.g. `"DEVICE_TIMEOUT"`
/// - **Namespace-prefixed** by layer: `DEVICE_`, `PROCESSOR_`, `TASK_`
/// - **Stable**: codes are part of the observable contract
///
/// # Recoverability
///
/// An error is recoverable when resubmitting the same command later may
/// succeed (a busy device, a dropped link). Misconfiguration and use of a
/// closed processor are not recoverable.
pub trait ErrorCode {
    /// Returns the stable error code.
    fn code(&self) -> &'static str;

    /// Returns whether retrying may succeed.
    fn is_recoverable(&self) -> bool;
}

/// Asserts that an error code follows the workspace conventions.
///
/// Intended for tests that walk every variant of an error enum.
///
/// # Panics
///
/// Panics if the code is empty, lacks `expected_prefix`, or is not
/// UPPER_SNAKE_CASE.
///
/// # Example
///
/// ```
/// use keyrelay_types::{assert_error_code, ErrorCode};
///
/// struct Busy;
/// impl ErrorCode for Busy {
///     fn code(&self) -> &'static str { "DEVICE_BUSY" }
///     fn is_recoverable(&self) -> bool { true }
/// }
///
/// assert_error_code(&Busy, "DEVICE_");
/// ```
pub fn assert_error_code<E: ErrorCode>(err: &E, expected_prefix: &str) {
    let code = err.code();

    assert!(!code.is_empty(), "Error code must not be empty");
    assert!(
        code.starts_with(expected_prefix),
        "Error code '{}' must start with prefix '{}'",
        code,
        expected_prefix
    );
    assert!(
        is_upper_snake_case(code),
        "Error code '{}' must be UPPER_SNAKE_CASE",
        code
    );
}

/// Asserts [`assert_error_code`] for every error in `errors`.
pub fn assert_error_codes<E: ErrorCode>(errors: &[E], expected_prefix: &str) {
    for err in errors {
        assert_error_code(err, expected_prefix);
    }
}

fn is_upper_snake_case(s: &str) -> bool {
    if s.is_empty() || s.starts_with('_') || s.ends_with('_') || s.contains("__") {
        return false;
    }

    s.chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}
