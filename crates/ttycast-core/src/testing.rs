//! In-memory observers for exercising the registry and deliverer.

use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;

use crate::error::DeliveryError;
use crate::message::Frame;
use crate::observer::Observer;

#[derive(Default)]
struct RecordState {
    frames: Vec<Frame>,
    closes: usize,
}

/// Read-only view of what a [`MockObserver`] has received.
#[derive(Clone, Default)]
pub(crate) struct Record {
    state: Arc<Mutex<RecordState>>,
}

impl Record {
    pub(crate) fn frames(&self) -> Vec<Frame> {
        self.state.lock().unwrap().frames.clone()
    }

    /// Every received frame concatenated, i.e. the observer's screen stream.
    pub(crate) fn bytes(&self) -> Vec<u8> {
        self.state
            .lock()
            .unwrap()
            .frames
            .iter()
            .flat_map(|f| f.as_bytes().to_vec())
            .collect()
    }

    pub(crate) fn closes(&self) -> usize {
        self.state.lock().unwrap().closes
    }
}

enum Behavior {
    Healthy,
    /// Accept this many frames, then fail every send with the given error.
    FailAfter(usize, fn() -> DeliveryError),
    /// Each send waits for a permit on the gate.
    Gated(Arc<Semaphore>),
}

pub(crate) struct MockObserver {
    seen: Record,
    behavior: Behavior,
}

impl MockObserver {
    pub(crate) fn healthy() -> (Self, Record) {
        Self::with(Behavior::Healthy)
    }

    /// Fails on its first send as if the peer had gone away normally.
    pub(crate) fn disconnected() -> (Self, Record) {
        Self::with(Behavior::FailAfter(0, || DeliveryError::Closed))
    }

    /// Accepts `n` frames, then fails with a transport error.
    pub(crate) fn failing_after(n: usize) -> (Self, Record) {
        Self::with(Behavior::FailAfter(n, || {
            DeliveryError::Transport("connection reset by peer".into())
        }))
    }

    pub(crate) fn gated(gate: Arc<Semaphore>) -> (Self, Record) {
        Self::with(Behavior::Gated(gate))
    }

    fn with(behavior: Behavior) -> (Self, Record) {
        let seen = Record::default();
        (
            Self {
                seen: seen.clone(),
                behavior,
            },
            seen,
        )
    }
}

impl Observer for MockObserver {
    async fn send(&mut self, frame: &Frame) -> Result<(), DeliveryError> {
        match &self.behavior {
            Behavior::Healthy => {}
            Behavior::FailAfter(n, err) => {
                if self.seen.state.lock().unwrap().frames.len() >= *n {
                    return Err(err());
                }
            }
            Behavior::Gated(gate) => {
                let permit = gate
                    .acquire()
                    .await
                    .map_err(|e| DeliveryError::Transport(e.to_string()))?;
                permit.forget();
            }
        }
        self.seen.state.lock().unwrap().frames.push(frame.clone());
        Ok(())
    }

    async fn close(&mut self) -> Result<(), DeliveryError> {
        self.seen.state.lock().unwrap().closes += 1;
        Ok(())
    }
}
