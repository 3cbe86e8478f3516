//! Per-command deadline heuristics.
//!
//! | Command | Deadline |
//! |---------|----------|
//! | `key:`, `combo:` | `short_ms` |
//! | `delay:N` | `short_ms + N` |
//! | `text:`, `line:`, bare text | `short_ms + per_char_ms * chars`, at most `max_ms` |
//!
//! Delays are not capped: a deliberate wait must not time out.

use keyrelay_event::split_command;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Deadline policy for normal commands.
///
/// # Example
///
/// ```
/// use keyrelay_runtime::TimeoutPolicy;
/// use std::time::Duration;
///
/// let policy = TimeoutPolicy::default();
/// assert_eq!(policy.timeout_for("key:ENTER"), Duration::from_millis(1000));
/// assert_eq!(policy.timeout_for("delay:500"), Duration::from_millis(1500));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutPolicy {
    pub short_ms: u64,
    pub per_char_ms: u64,
    pub max_ms: u64,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            short_ms: 1_000,
            per_char_ms: 50,
            max_ms: 30_000,
        }
    }
}

impl TimeoutPolicy {
    #[must_use]
    pub fn timeout_for(&self, text: &str) -> Duration {
        let ms = match split_command(text) {
            Some((prefix, payload)) => match prefix.as_str() {
                "key" | "combo" => self.short_ms,
                "delay" => self
                    .short_ms
                    .saturating_add(payload.trim().parse::<u64>().unwrap_or(0)),
                "text" | "line" => self.bulk(payload),
                _ => self.bulk(text),
            },
            None => self.bulk(text),
        };
        Duration::from_millis(ms)
    }

    fn bulk(&self, chars: &str) -> u64 {
        let count = chars.chars().count() as u64;
        let ms = self
            .short_ms
            .saturating_add(self.per_char_ms.saturating_mul(count));
        ms.min(self.max_ms).max(self.short_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_commands() {
        let p = TimeoutPolicy::default();
        assert_eq!(p.timeout_for("combo:CTRL+C"), Duration::from_millis(1000));
        assert_eq!(p.timeout_for("KEY:esc"), Duration::from_millis(1000));
    }

    #[test]
    fn text_scales_with_length() {
        let p = TimeoutPolicy::default();
        assert_eq!(p.timeout_for("text:abcd"), Duration::from_millis(1200));
        assert_eq!(p.timeout_for("line:Hello"), Duration::from_millis(1250));
        assert_eq!(p.timeout_for("hi"), Duration::from_millis(1100));
    }

    #[test]
    fn bulk_is_capped() {
        let p = TimeoutPolicy {
            short_ms: 100,
            per_char_ms: 10,
            max_ms: 500,
        };
        let long = format!("text:{}", "x".repeat(1000));
        assert_eq!(p.timeout_for(&long), Duration::from_millis(500));
    }

    #[test]
    fn max_below_short_keeps_short() {
        let p = TimeoutPolicy {
            short_ms: 800,
            per_char_ms: 10,
            max_ms: 100,
        };
        assert_eq!(p.timeout_for("text:abc"), Duration::from_millis(800));
    }

    #[test]
    fn delay_is_not_capped() {
        let p = TimeoutPolicy {
            short_ms: 100,
            per_char_ms: 10,
            max_ms: 500,
        };
        assert_eq!(p.timeout_for("delay:5000"), Duration::from_millis(5100));
        assert_eq!(p.timeout_for("delay:abc"), Duration::from_millis(100));
    }
}
