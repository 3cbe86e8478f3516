//! Processor state machine.
//!
//! ```text
//!            STOP                    PAUSE
//!   ┌──────────────────┐   ┌───────────────────┐
//!   ▼                  │   │                   ▼
//! STOPPED ──RESUME──► RUNNING ◄──RESUME──── PAUSED
//!   ▲                                          │
//!   └──────────────────STOP────────────────────┘
//!
//! RESET: any state, unchanged
//! ```
//!
//! Besides the state, the processor keeps a stop epoch. Every normal
//! command is stamped with the epoch at enqueue time and is discarded if
//! the epoch moved before dispatch. STOP moves the epoch, and so does
//! RESUME out of STOPPED, so nothing submitted before or during a stop
//! survives it.

use keyrelay_event::PriorityCommand;
use serde::{Deserialize, Serialize};

/// Dispatch state of a processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessorState {
    /// Normal commands are dispatched.
    #[default]
    Running,
    /// Normal commands are held, in order, until resumed.
    Paused,
    /// Normal commands are discarded until resumed.
    Stopped,
}

impl ProcessorState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Paused => "PAUSED",
            Self::Stopped => "STOPPED",
        }
    }
}

impl std::fmt::Display for ProcessorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of applying a priority command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: ProcessorState,
    pub to: ProcessorState,
    /// Epoch after the transition.
    pub epoch: u64,
}

impl Transition {
    #[must_use]
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

/// State plus stop epoch; always mutated together under one lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControlState {
    state: ProcessorState,
    epoch: u64,
}

impl ControlState {
    #[must_use]
    pub fn state(&self) -> ProcessorState {
        self.state
    }

    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Whether a command stamped with `epoch` may still be dispatched.
    #[must_use]
    pub fn admits(&self, epoch: u64) -> bool {
        self.state != ProcessorState::Stopped && self.epoch == epoch
    }

    /// Applies one priority command.
    ///
    /// PAUSE while STOPPED is ignored: a stopped processor discards, and
    /// pausing it would turn that into holding.
    pub fn apply(&mut self, command: PriorityCommand) -> Transition {
        let from = self.state;
        match command {
            PriorityCommand::Stop => {
                self.state = ProcessorState::Stopped;
                self.epoch += 1;
            }
            PriorityCommand::Pause => {
                if self.state == ProcessorState::Running {
                    self.state = ProcessorState::Paused;
                }
            }
            PriorityCommand::Resume => {
                if self.state == ProcessorState::Stopped {
                    self.epoch += 1;
                }
                self.state = ProcessorState::Running;
            }
            PriorityCommand::Reset => {}
        }
        Transition {
            from,
            to: self.state,
            epoch: self.epoch,
        }
    }
}
