//! Bounded FIFO between the output tap and the fan-out deliverer.
//!
//! A full queue blocks the producer. With a single deliverer writing to every
//! observer in turn, a slow observer therefore slows the PTY reader instead of
//! growing memory or dropping output.

use tokio::sync::mpsc;

use crate::error::QueueClosed;
use crate::message::BroadcastMessage;

/// Number of messages the queue holds before producers block.
pub const QUEUE_CAPACITY: usize = 1024;

/// Create a broadcast queue holding at most `capacity` messages.
pub fn channel(capacity: usize) -> (QueueSender, QueueReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (QueueSender { tx }, QueueReceiver { rx })
}

/// Producer side. Cloned for the output tap and the signal coordinator.
#[derive(Debug, Clone)]
pub struct QueueSender {
    tx: mpsc::Sender<BroadcastMessage>,
}

impl QueueSender {
    /// Enqueue from synchronous code, blocking the thread while the queue is
    /// full.
    ///
    /// Must not be called from inside an async task.
    pub fn enqueue_blocking(&self, message: BroadcastMessage) -> Result<(), QueueClosed> {
        self.tx.blocking_send(message).map_err(|_| QueueClosed)
    }

    /// Enqueue from async code, waiting while the queue is full.
    pub async fn enqueue(&self, message: BroadcastMessage) -> Result<(), QueueClosed> {
        self.tx.send(message).await.map_err(|_| QueueClosed)
    }

    /// Free slots left before producers start blocking.
    pub fn remaining_capacity(&self) -> usize {
        self.tx.capacity()
    }
}

/// Consumer side, owned by the deliverer.
#[derive(Debug)]
pub struct QueueReceiver {
    rx: mpsc::Receiver<BroadcastMessage>,
}

impl QueueReceiver {
    /// Wait for the next message.
    ///
    /// Returns `None` once every sender is dropped and the queue is drained.
    pub async fn next(&mut self) -> Option<BroadcastMessage> {
        self.rx.recv().await
    }

    /// Take the next message if one is ready.
    pub fn try_next(&mut self) -> Option<BroadcastMessage> {
        self.rx.try_recv().ok()
    }
}
