//! Messages carried by the broadcast queue and the frames they expand to.

use std::sync::Arc;

use crate::escape::{resize_sequence, CLEAR_SCREEN};
use crate::geometry::TermSize;

/// Bytes produced by one read from the PTY.
///
/// Chunk boundaries are arbitrary: a chunk may end in the middle of a line,
/// an escape sequence or a UTF-8 code point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk(Arc<[u8]>);

impl OutputChunk {
    pub fn new(bytes: &[u8]) -> Self {
        Self(Arc::from(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One entry of the broadcast queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastMessage {
    /// Output from the child process.
    Output(OutputChunk),
    /// Geometry change: observers get a clear-screen frame immediately
    /// followed by a resize frame.
    ///
    /// Both frames ride on a single queue entry so nothing enqueued
    /// concurrently can land between them.
    Resync(TermSize),
}

impl BroadcastMessage {
    pub fn output(bytes: &[u8]) -> Self {
        BroadcastMessage::Output(OutputChunk::new(bytes))
    }

    /// Frames to write to each observer, in order.
    pub fn frames(&self) -> Vec<Frame> {
        match self {
            BroadcastMessage::Output(chunk) => vec![Frame::from_output(chunk.as_bytes())],
            BroadcastMessage::Resync(size) => vec![
                Frame::Text(CLEAR_SCREEN.to_string()),
                Frame::Text(resize_sequence(*size)),
            ],
        }
    }
}

/// A single message on an observer's connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl Frame {
    /// Text when the chunk is valid UTF-8 on its own, binary otherwise.
    pub fn from_output(bytes: &[u8]) -> Self {
        match std::str::from_utf8(bytes) {
            Ok(text) => Frame::Text(text.to_string()),
            Err(_) => Frame::Binary(bytes.to_vec()),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Frame::Text(text) => text.as_bytes(),
            Frame::Binary(bytes) => bytes,
        }
    }
}
