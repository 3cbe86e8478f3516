//! Holding area for normal commands dequeued while paused.
//!
//! The consumer loop moves commands here instead of dispatching them
//! while the processor is paused, and drains it front to back once the
//! processor runs again. The queue is unbounded: pausing must never lose
//! a command.

use super::QueuedCommand;
use std::collections::VecDeque;
use tracing::{debug, info};

#[derive(Debug, Default)]
pub(crate) struct HeldQueue {
    queue: VecDeque<QueuedCommand>,
}

impl HeldQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn push(&mut self, command: QueuedCommand, processor: impl std::fmt::Display) {
        debug!(
            "CommandProcessor {}: holding {} while paused (held={})",
            processor,
            command.group.id(),
            self.queue.len() + 1
        );
        self.queue.push_back(command);
    }

    pub(crate) fn pop_front(&mut self) -> Option<QueuedCommand> {
        self.queue.pop_front()
    }

    /// Removes every held command, oldest first.
    pub(crate) fn drain(
        &mut self,
        processor: impl std::fmt::Display,
    ) -> impl Iterator<Item = QueuedCommand> + '_ {
        let count = self.queue.len();
        if count > 0 {
            info!("CommandProcessor {}: releasing {} held commands", processor, count);
        }
        self.queue.drain(..)
    }
}
