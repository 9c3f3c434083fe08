//! Broadcast engine for ttycast.
//!
//! Everything between "the child wrote some bytes" and "every observer got
//! them" lives here, independent of any concrete PTY or network transport:
//!
//! - [`tap`]: splits each output chunk into the persistent sink, the local
//!   terminal and the broadcast queue
//! - [`queue`]: bounded FIFO between producers and the deliverer
//! - [`registry`]: the set of connected observers
//! - [`deliverer`]: drains the queue into the registry
//! - [`coordinator`]: resize/terminate event handling
//! - [`sink`]: append-only output mirror
//!
//! The CLI crate plugs a PTY, a host terminal and WebSocket observers into
//! these pieces through the traits in [`geometry`] and [`observer`].

pub mod coordinator;
pub mod deliverer;
pub mod error;
pub mod escape;
pub mod geometry;
pub mod message;
pub mod observer;
pub mod queue;
pub mod registry;
pub mod sink;
pub mod tap;

#[cfg(test)]
pub(crate) mod testing;
