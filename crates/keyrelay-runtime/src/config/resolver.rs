//! Last-layer overrides.
//!
//! ```text
//! ConfigLoader.load()  →  KeyrelayConfig (files + env)
//!                              │
//!                              ▼
//!                     ConfigResolver.apply()   e.g. CLI flags
//!                              │
//!                              ▼
//!                     KeyrelayConfig (final)
//! ```

use super::KeyrelayConfig;

/// Applies overrides on top of a loaded configuration.
///
/// Implementations should only touch the fields they were given a value
/// for.
///
/// # Example
///
/// ```
/// use keyrelay_runtime::config::{ConfigResolver, KeyrelayConfig};
/// use keyrelay_runtime::DeviceKind;
///
/// struct ModeFlag(Option<DeviceKind>);
///
/// impl ConfigResolver for ModeFlag {
///     fn apply(&self, config: &mut KeyrelayConfig) {
///         if let Some(mode) = self.0 {
///             config.mode = mode;
///         }
///     }
/// }
///
/// let mut config = KeyrelayConfig::default();
/// ModeFlag(Some(DeviceKind::Local)).apply(&mut config);
/// assert_eq!(config.mode, DeviceKind::Local);
/// ```
pub trait ConfigResolver {
    fn apply(&self, config: &mut KeyrelayConfig);
}

/// Resolver that changes nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpResolver;

impl ConfigResolver for NoOpResolver {
    fn apply(&self, _config: &mut KeyrelayConfig) {}
}
