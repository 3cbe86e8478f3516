//! Command classification.
//!
//! The core treats normal commands as opaque strings. The only structure
//! it looks at is the `prefix:` used for timeout heuristics and for the
//! logical [`CommandKind`] recorded on each context. The four priority
//! tokens are recognized case-insensitively as [`PriorityCommand`].
//!
//! # Grammar
//!
//! | Text | Kind |
//! |------|------|
//! | `STOP`, `pause`, `Resume`, `reset` | priority |
//! | `key:ENTER` | [`CommandKind::Key`] |
//! | `text:hello` | [`CommandKind::Text`] |
//! | `line:hello` | [`CommandKind::Line`] |
//! | `combo:CTRL+ALT+DEL` | [`CommandKind::Combo`] |
//! | `delay:250` | [`CommandKind::Delay`] |
//! | anything else | [`CommandKind::Undefined`] |

use serde::{Deserialize, Serialize};

/// Interrupt-like commands that bypass queue ordering and flow control.
///
/// | Kind | Transition |
/// |------|------------|
/// | `Stop` | `RUNNING → STOPPED` (queued normal commands discarded) |
/// | `Pause` | `RUNNING → PAUSED` (queued normal commands held) |
/// | `Resume` | `PAUSED/STOPPED → RUNNING` |
/// | `Reset` | state unchanged, device reinitialized |
///
/// # Example
///
/// ```
/// use keyrelay_event::PriorityCommand;
///
/// assert_eq!(PriorityCommand::parse("  stop "), Some(PriorityCommand::Stop));
/// assert_eq!(PriorityCommand::parse("Resume"), Some(PriorityCommand::Resume));
/// assert_eq!(PriorityCommand::parse("text:stop"), None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PriorityCommand {
    Stop,
    Pause,
    Resume,
    Reset,
}

impl PriorityCommand {
    /// All priority commands.
    pub const ALL: [PriorityCommand; 4] = [Self::Stop, Self::Pause, Self::Resume, Self::Reset];

    /// Recognizes a priority token, ignoring case and surrounding whitespace.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        Self::ALL
            .into_iter()
            .find(|cmd| cmd.as_str().eq_ignore_ascii_case(text))
    }

    /// Returns the canonical token, which is also what a transport writes
    /// to the wire.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stop => "STOP",
            Self::Pause => "PAUSE",
            Self::Resume => "RESUME",
            Self::Reset => "RESET",
        }
    }
}

impl std::fmt::Display for PriorityCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logical classification of a command, recorded on its context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandKind {
    /// Single named key (`key:ENTER`).
    Key,
    /// Character sequence (`text:...`).
    Text,
    /// Character sequence followed by Enter (`line:...`).
    Line,
    /// Chord of modifiers and a key (`combo:CTRL+C`).
    Combo,
    /// Pause of the given number of milliseconds (`delay:250`).
    Delay,
    Stop,
    Pause,
    Resume,
    Reset,
    /// Unrecognized text, and batches.
    Undefined,
}

impl CommandKind {
    /// Classifies raw command text.
    ///
    /// # Example
    ///
    /// ```
    /// use keyrelay_event::CommandKind;
    ///
    /// assert_eq!(CommandKind::classify("KEY:enter"), CommandKind::Key);
    /// assert_eq!(CommandKind::classify("line:Hello"), CommandKind::Line);
    /// assert_eq!(CommandKind::classify("pause"), CommandKind::Pause);
    /// assert_eq!(CommandKind::classify("hello"), CommandKind::Undefined);
    /// ```
    #[must_use]
    pub fn classify(text: &str) -> Self {
        if let Some(priority) = PriorityCommand::parse(text) {
            return priority.into();
        }

        match split_command(text) {
            Some((prefix, _)) => match prefix.as_str() {
                "key" => Self::Key,
                "text" => Self::Text,
                "line" => Self::Line,
                "combo" => Self::Combo,
                "delay" => Self::Delay,
                _ => Self::Undefined,
            },
            None => Self::Undefined,
        }
    }

    /// Returns `true` for the four priority kinds.
    #[must_use]
    pub fn is_priority(&self) -> bool {
        matches!(self, Self::Stop | Self::Pause | Self::Resume | Self::Reset)
    }
}

impl From<PriorityCommand> for CommandKind {
    fn from(cmd: PriorityCommand) -> Self {
        match cmd {
            PriorityCommand::Stop => Self::Stop,
            PriorityCommand::Pause => Self::Pause,
            PriorityCommand::Resume => Self::Resume,
            PriorityCommand::Reset => Self::Reset,
        }
    }
}

/// Splits `prefix:payload` into a lowercased prefix and the untouched payload.
///
/// Returns `None` when there is no `:` or the prefix is not a plain word,
/// so text such as `http://x` or `a b:c` is not mistaken for a command.
///
/// # Example
///
/// ```
/// use keyrelay_event::split_command;
///
/// assert_eq!(split_command("Text:a:b"), Some(("text".to_string(), "a:b")));
/// assert_eq!(split_command("no prefix"), None);
/// ```
#[must_use]
pub fn split_command(text: &str) -> Option<(String, &str)> {
    let (prefix, payload) = text.split_once(':')?;
    let prefix = prefix.trim_start();
    if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    Some((prefix.to_ascii_lowercase(), payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_parse_ignores_case_and_whitespace() {
        for cmd in PriorityCommand::ALL {
            assert_eq!(PriorityCommand::parse(cmd.as_str()), Some(cmd));
            assert_eq!(
                PriorityCommand::parse(&format!(" {} ", cmd.as_str().to_lowercase())),
                Some(cmd)
            );
        }
        assert_eq!(PriorityCommand::parse("stopped"), None);
        assert_eq!(PriorityCommand::parse(""), None);
    }

    #[test]
    fn classify_prefixes() {
        assert_eq!(CommandKind::classify("text:abc"), CommandKind::Text);
        assert_eq!(CommandKind::classify("Combo:CTRL+C"), CommandKind::Combo);
        assert_eq!(CommandKind::classify("delay:100"), CommandKind::Delay);
        assert_eq!(CommandKind::classify("mouse:1,2"), CommandKind::Undefined);
        assert_eq!(CommandKind::classify("http://x"), CommandKind::Undefined);
    }

    #[test]
    fn priority_kinds() {
        assert!(CommandKind::classify("RESET").is_priority());
        assert!(!CommandKind::classify("key:ESC").is_priority());
    }

    #[test]
    fn split_keeps_payload_verbatim() {
        assert_eq!(
            split_command("line: padded "),
            Some(("line".to_string(), " padded "))
        );
        assert_eq!(split_command(":x"), None);
        assert_eq!(split_command("two words:x"), None);
    }
}
