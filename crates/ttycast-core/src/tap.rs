//! The single point every byte of child output passes through.

use std::io::Write;

use tracing::trace;

use crate::error::TapError;
use crate::message::BroadcastMessage;
use crate::queue::QueueSender;

/// Fans each output chunk out to three sinks, always in this order:
///
/// 1. the persistent sink (output mirror on disk)
/// 2. the local terminal
/// 3. the broadcast queue
///
/// The first two are plain [`Write`] values so tests can use in-memory
/// buffers. Enqueueing blocks while the queue is full.
pub struct OutputTap<P, T> {
    persistent: P,
    terminal: T,
    queue: QueueSender,
}

impl<P: Write, T: Write> OutputTap<P, T> {
    pub fn new(persistent: P, terminal: T, queue: QueueSender) -> Self {
        Self {
            persistent,
            terminal,
            queue,
        }
    }

    /// Pass one chunk through all three sinks.
    ///
    /// Stops at the first failing sink; later sinks do not see the chunk.
    pub fn tap(&mut self, chunk: &[u8]) -> Result<(), TapError> {
        if chunk.is_empty() {
            return Ok(());
        }

        self.persistent
            .write_all(chunk)
            .map_err(TapError::Persist)?;

        self.terminal
            .write_all(chunk)
            .and_then(|()| self.terminal.flush())
            .map_err(TapError::Terminal)?;

        self.queue
            .enqueue_blocking(BroadcastMessage::output(chunk))?;

        trace!(bytes = chunk.len(), "tapped output chunk");
        Ok(())
    }

    pub fn persistent(&self) -> &P {
        &self.persistent
    }

    pub fn terminal(&self) -> &T {
        &self.terminal
    }
}
