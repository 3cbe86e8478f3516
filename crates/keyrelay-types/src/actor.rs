//! Source actor (point of origin) types.
//!
//! A [`SourceActor`] names *where* a command or event came from. It is
//! identity only: the core never makes a decision based on it, it is
//! carried along for the event trail and for logging.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// The origin of an event group or event.
///
/// | Variant | Typical producer |
/// |---------|------------------|
/// | `Web` | HTTP endpoint translating requests into commands |
/// | `CommandLine` | Console reader |
/// | `FileWatcher` | Watched command file |
/// | `Gui` | Desktop front-end |
/// | `Device` | Telemetry read back from an output device |
/// | `Error` | Error paths that need their own causal root |
/// | `SystemSetup` | Bootstrap and shutdown |
/// | `Unknown` | Anything else |
///
/// # Example
///
/// ```
/// use keyrelay_types::SourceActor;
///
/// let actor: SourceActor = "file_watcher".parse().unwrap();
/// assert_eq!(actor, SourceActor::FileWatcher);
/// assert_eq!(actor.as_str(), "FILE_WATCHER");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceActor {
    Web,
    CommandLine,
    FileWatcher,
    Gui,
    Device,
    Error,
    SystemSetup,
    Unknown,
}

impl SourceActor {
    /// All actors, in declaration order.
    pub const ALL: [SourceActor; 8] = [
        Self::Web,
        Self::CommandLine,
        Self::FileWatcher,
        Self::Gui,
        Self::Device,
        Self::Error,
        Self::SystemSetup,
        Self::Unknown,
    ];

    /// Returns the stable wire name of this actor.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Web => "WEB",
            Self::CommandLine => "COMMAND_LINE",
            Self::FileWatcher => "FILE_WATCHER",
            Self::Gui => "GUI",
            Self::Device => "DEVICE",
            Self::Error => "ERROR",
            Self::SystemSetup => "SYSTEM_SETUP",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for SourceActor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceActor {
    type Err = String;

    /// Parses an actor name case-insensitively; `-` and `_` are interchangeable.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|actor| actor.as_str() == normalized)
            .ok_or_else(|| format!("unknown source actor: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_serde_name() {
        for actor in SourceActor::ALL {
            let json = serde_json::to_string(&actor).unwrap();
            assert_eq!(json, format!("\"{}\"", actor));
        }
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!("web".parse::<SourceActor>().unwrap(), SourceActor::Web);
        assert_eq!(
            "Command-Line".parse::<SourceActor>().unwrap(),
            SourceActor::CommandLine
        );
        assert!("keyboard".parse::<SourceActor>().is_err());
    }
}
