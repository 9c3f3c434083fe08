//! WebSocket observers.
//!
//! The write half of each upgraded socket is handed to the registry; the read
//! half stays with the connection task, which only watches for the client
//! going away.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tracing::debug;
use ttycast_core::error::DeliveryError;
use ttycast_core::message::Frame;
use ttycast_core::observer::{Observer, ObserverId};
use ttycast_core::registry::ObserverRegistry;

/// Reason sent with the normal-closure frame on teardown.
pub const SHUTDOWN_REASON: &str = "server shutdown";

/// Set once the client has closed its side of the socket.
///
/// Shared between the observer and its read half, so a failed write after the
/// client left counts as a normal disconnect.
#[derive(Debug, Clone, Default)]
pub struct PeerClosed(Arc<AtomicBool>);

impl PeerClosed {
    pub fn mark(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_marked(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Write half of an observer's WebSocket.
pub struct WsObserver<S = SplitSink<WebSocket, Message>> {
    sink: S,
    remote_addr: SocketAddr,
    peer_closed: PeerClosed,
}

impl<S> WsObserver<S> {
    pub fn new(sink: S, remote_addr: SocketAddr) -> Self {
        Self {
            sink,
            remote_addr,
            peer_closed: PeerClosed::default(),
        }
    }

    /// Handle for the read half to report a client-side close.
    pub fn peer_closed(&self) -> PeerClosed {
        self.peer_closed.clone()
    }

    fn classify(&self, e: impl fmt::Display) -> DeliveryError {
        if self.peer_closed.is_marked() {
            DeliveryError::Closed
        } else {
            DeliveryError::Transport(e.to_string())
        }
    }
}

impl<S> Observer for WsObserver<S>
where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: fmt::Display,
{
    async fn send(&mut self, frame: &Frame) -> Result<(), DeliveryError> {
        let result = self.sink.send(to_message(frame)).await;
        result.map_err(|e| self.classify(e))
    }

    async fn close(&mut self) -> Result<(), DeliveryError> {
        let frame = CloseFrame {
            code: close_code::NORMAL,
            reason: SHUTDOWN_REASON.into(),
        };
        debug!(remote = %self.remote_addr, "closing observer");
        let result = self.sink.send(Message::Close(Some(frame))).await;
        result.map_err(|e| self.classify(e))
    }
}

fn to_message(frame: &Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.clone()),
        Frame::Binary(bytes) => Message::Binary(bytes.clone()),
    }
}

/// Drain the read half until the client closes, then drop the observer.
///
/// Anything the client sends is ignored: observers are read-only.
pub async fn watch_for_close<St, E, S>(
    mut stream: St,
    id: ObserverId,
    peer_closed: PeerClosed,
    registry: Arc<ObserverRegistry<WsObserver<S>>>,
) where
    St: Stream<Item = Result<Message, E>> + Unpin,
    E: fmt::Display,
    WsObserver<S>: Observer,
{
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Close(frame)) => {
                debug!(%id, ?frame, "observer sent close");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                debug!(%id, error = %e, "observer read failed");
                break;
            }
        }
    }
    peer_closed.mark();
    registry.remove(id).await;
}
