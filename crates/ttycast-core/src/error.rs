//! Error types for the broadcast engine.

use std::io;

use thiserror::Error;

/// Why a frame could not be written to an observer.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The peer closed the connection normally. This is an expected
    /// disconnect, not an anomaly.
    #[error("connection closed")]
    Closed,
    /// Any other transport failure.
    #[error("transport error: {0}")]
    Transport(String),
}

impl DeliveryError {
    pub fn is_normal_closure(&self) -> bool {
        matches!(self, DeliveryError::Closed)
    }
}

/// The broadcast queue has no consumer left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("broadcast queue closed")]
pub struct QueueClosed;

/// Failure of one of the output tap's sinks.
#[derive(Debug, Error)]
pub enum TapError {
    #[error("failed to append output: {0}")]
    Persist(#[source] io::Error),
    #[error("failed to write output to the local terminal: {0}")]
    Terminal(#[source] io::Error),
    #[error(transparent)]
    Queue(#[from] QueueClosed),
}

/// The registry has been torn down and accepts no more observers.
///
/// Carries the rejected connection back to the caller so it can be closed.
#[derive(Error)]
#[error("observer registry is sealed")]
pub struct RegistrySealed<C>(pub C);

impl<C> std::fmt::Debug for RegistrySealed<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RegistrySealed(..)")
    }
}

/// Fatal failure while handling a session event.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("failed to query terminal size: {0}")]
    Geometry(#[source] io::Error),
    #[error(transparent)]
    Queue(#[from] QueueClosed),
}
