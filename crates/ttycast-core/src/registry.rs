//! The set of connected observers.
//!
//! The set itself sits behind one async mutex that is only held for
//! bookkeeping, never across observer I/O. Each observer has its own lock, so
//! a delivery pass writes from a snapshot of the set while teardown can seal
//! and empty the registry at any moment. A write that hangs blocks its own
//! observer and nothing else.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{DeliveryError, RegistrySealed};
use crate::message::{BroadcastMessage, Frame};
use crate::observer::{Observer, ObserverId};

/// How long teardown waits for each observer to accept its close frame.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

struct Slot<C> {
    id: ObserverId,
    /// `None` once teardown has taken the connection.
    conn: Mutex<Option<C>>,
}

struct State<C> {
    /// In join order.
    observers: Vec<Arc<Slot<C>>>,
    /// Set by `remove_all`; no observer may join afterwards.
    sealed: bool,
}

/// Outcome of one delivery pass.
#[derive(Debug, Default)]
pub struct DeliveryReport {
    /// Observers that received every frame of the message.
    pub delivered: usize,
    /// Observers that failed and were removed, with the first error each hit.
    pub dropped: Vec<(ObserverId, DeliveryError)>,
}

pub struct ObserverRegistry<C> {
    state: Mutex<State<C>>,
    next_id: AtomicU64,
}

impl<C: Observer> Default for ObserverRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Observer> ObserverRegistry<C> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                observers: Vec::new(),
                sealed: false,
            }),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a connected observer.
    ///
    /// Fails once the registry has been torn down, handing the connection
    /// back so the caller can close it.
    pub async fn add(&self, observer: C) -> Result<ObserverId, RegistrySealed<C>> {
        let mut state = self.state.lock().await;
        if state.sealed {
            return Err(RegistrySealed(observer));
        }
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        state.observers.push(Arc::new(Slot {
            id,
            conn: Mutex::new(Some(observer)),
        }));
        debug!(%id, count = state.observers.len(), "observer registered");
        Ok(id)
    }

    /// Remove an observer without closing it.
    ///
    /// Returns false if it was not registered. A pass already writing to the
    /// observer finishes that write; later passes skip it.
    pub async fn remove(&self, id: ObserverId) -> bool {
        let mut state = self.state.lock().await;
        let Some(pos) = state.observers.iter().position(|slot| slot.id == id) else {
            return false;
        };
        state.observers.remove(pos);
        debug!(%id, count = state.observers.len(), "observer removed");
        true
    }

    /// Seal the registry, empty it, and close every observer with a
    /// normal-closure status.
    ///
    /// The registry is sealed and empty as soon as this starts closing, even
    /// while a delivery pass is in flight. Each close waits at most
    /// [`CLOSE_TIMEOUT`]; an observer stuck in a write is dropped without a
    /// close frame. Calling this again is a no-op. Returns the number of
    /// observers that were registered.
    pub async fn remove_all(&self) -> usize {
        let observers = {
            let mut state = self.state.lock().await;
            state.sealed = true;
            std::mem::take(&mut state.observers)
        };
        let count = observers.len();

        let mut closing = JoinSet::new();
        for slot in observers {
            closing.spawn(close_slot(slot));
        }
        while closing.join_next().await.is_some() {}

        if count > 0 {
            info!(count, "closed all observers");
        }
        count
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.observers.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn is_sealed(&self) -> bool {
        self.state.lock().await.sealed
    }

    /// Run one delivery pass: write `message` to every observer in join order.
    ///
    /// The pass works on the observers registered when it starts. A failing
    /// observer gets no further frames, is not retried, and is removed after
    /// the pass. Other observers are unaffected.
    pub async fn broadcast(&self, message: &BroadcastMessage) -> DeliveryReport {
        let frames = message.frames();
        let snapshot = self.state.lock().await.observers.clone();
        let mut report = DeliveryReport::default();

        for slot in &snapshot {
            let mut conn = slot.conn.lock().await;
            // Closed by teardown while this pass was running.
            let Some(observer) = conn.as_mut() else {
                continue;
            };
            match send_all(observer, &frames).await {
                Ok(()) => report.delivered += 1,
                Err(e) => report.dropped.push((slot.id, e)),
            }
        }

        if !report.dropped.is_empty() {
            let dropped = &report.dropped;
            self.state
                .lock()
                .await
                .observers
                .retain(|slot| !dropped.iter().any(|(gone, _)| *gone == slot.id));
        }

        report
    }
}

async fn send_all<C: Observer>(observer: &mut C, frames: &[Frame]) -> Result<(), DeliveryError> {
    for frame in frames {
        observer.send(frame).await?;
    }
    Ok(())
}

async fn close_slot<C: Observer>(slot: Arc<Slot<C>>) {
    let id = slot.id;
    let closed = timeout(CLOSE_TIMEOUT, async {
        let taken = slot.conn.lock().await.take();
        match taken {
            Some(mut observer) => observer.close().await,
            None => Ok(()),
        }
    })
    .await;

    match closed {
        Ok(Ok(())) => {}
        Ok(Err(e)) if e.is_normal_closure() => {}
        Ok(Err(e)) => warn!(%id, error = %e, "failed to close observer"),
        Err(_) => warn!(%id, "observer did not close in time, dropping it"),
    }
}
