//! The connection seam between the registry and a concrete transport.

use std::fmt;
use std::future::Future;

use crate::error::DeliveryError;
use crate::message::Frame;

/// Registry-assigned handle for one observer.
///
/// Ids increase monotonically, so they also record join order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(pub u64);

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "observer-{}", self.0)
    }
}

/// A live connection to one remote observer.
pub trait Observer: Send + 'static {
    /// Write one frame. A failure is final: the registry drops the observer
    /// and never retries.
    fn send(&mut self, frame: &Frame) -> impl Future<Output = Result<(), DeliveryError>> + Send;

    /// Close the connection with a normal-closure status.
    fn close(&mut self) -> impl Future<Output = Result<(), DeliveryError>> + Send;
}
