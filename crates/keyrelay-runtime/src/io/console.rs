//! Line-oriented console input.

use crate::processor::ProcessorError;
use crate::service::CommandService;
use crate::tasks::TaskResult;
use keyrelay_types::SourceActor;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Stdin};
use tracing::{debug, info, warn};

/// Reads one command per line and submits it to the service.
///
/// Blank lines are skipped. The loop ends at end of input or once the
/// service is shut down.
pub struct ConsoleInput<R> {
    reader: R,
    service: Arc<CommandService>,
    actor: SourceActor,
}

impl ConsoleInput<BufReader<Stdin>> {
    #[must_use]
    pub fn stdin(service: Arc<CommandService>) -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), service)
    }
}

impl<R> ConsoleInput<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    #[must_use]
    pub fn new(reader: R, service: Arc<CommandService>) -> Self {
        Self {
            reader,
            service,
            actor: SourceActor::CommandLine,
        }
    }

    /// Overrides the source actor recorded on submitted commands.
    #[must_use]
    pub fn with_actor(mut self, actor: SourceActor) -> Self {
        self.actor = actor;
        self
    }

    /// Runs until end of input.
    ///
    /// # Errors
    ///
    /// Read errors on the underlying stream.
    pub async fn run(self) -> TaskResult {
        let mut lines = self.reader.lines();
        let mut submitted = 0usize;

        while let Some(line) = lines.next_line().await? {
            let text = line.trim();
            if text.is_empty() {
                continue;
            }
            match self.service.submit_command(self.actor, text) {
                Ok(group) => {
                    submitted += 1;
                    debug!(group = %group.id(), "console: submitted {:?}", text);
                }
                Err(ProcessorError::Closed) => {
                    debug!("console: service closed");
                    break;
                }
                Err(e) => warn!("console: {:?} rejected: {}", text, e),
            }
        }

        info!("console: input ended after {} commands", submitted);
        Ok(())
    }
}
