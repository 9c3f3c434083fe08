//! Resize and termination handling.
//!
//! The coordinator consumes an abstract stream of [`SessionEvent`]s rather
//! than OS signals, so tests can drive it with synthetic events. The CLI maps
//! SIGWINCH to [`SessionEvent::Resize`] and SIGINT/SIGTERM to
//! [`SessionEvent::Terminate`].

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::CoordinatorError;
use crate::geometry::{GeometrySource, PtyResize};
use crate::message::BroadcastMessage;
use crate::observer::Observer;
use crate::queue::QueueSender;
use crate::registry::ObserverRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// The host terminal changed size (or the initial size must be applied).
    Resize,
    /// Interrupt or termination requested.
    Terminate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Running,
    /// Observers are closed; the process should exit successfully.
    Terminated,
}

pub struct SignalCoordinator<G, R, C> {
    geometry: G,
    pty: R,
    queue: QueueSender,
    registry: Arc<ObserverRegistry<C>>,
    state: CoordinatorState,
}

impl<G, R, C> SignalCoordinator<G, R, C>
where
    G: GeometrySource,
    R: PtyResize,
    C: Observer,
{
    pub fn new(
        geometry: G,
        pty: R,
        queue: QueueSender,
        registry: Arc<ObserverRegistry<C>>,
    ) -> Self {
        Self {
            geometry,
            pty,
            queue,
            registry,
            state: CoordinatorState::Running,
        }
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    /// Handle events until termination.
    ///
    /// Returns `Terminated` after a terminate event, or `Running` if the event
    /// stream ended first.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<SessionEvent>,
    ) -> Result<CoordinatorState, CoordinatorError> {
        while let Some(event) = events.recv().await {
            if self.handle(event).await? == CoordinatorState::Terminated {
                break;
            }
        }
        Ok(self.state)
    }

    /// Apply a single event.
    ///
    /// Events arriving after termination are ignored.
    pub async fn handle(
        &mut self,
        event: SessionEvent,
    ) -> Result<CoordinatorState, CoordinatorError> {
        if self.state == CoordinatorState::Terminated {
            debug!(?event, "ignoring event after termination");
            return Ok(self.state);
        }

        match event {
            SessionEvent::Resize => {
                let size = self.geometry.size().map_err(CoordinatorError::Geometry)?;
                if let Err(e) = self.pty.resize(size) {
                    warn!(error = %e, "failed to resize PTY");
                }
                self.queue.enqueue(BroadcastMessage::Resync(size)).await?;
                debug!(cols = size.cols, rows = size.rows, "terminal resized");
            }
            SessionEvent::Terminate => {
                info!("termination requested, closing observers");
                self.registry.remove_all().await;
                self.state = CoordinatorState::Terminated;
            }
        }

        Ok(self.state)
    }
}
