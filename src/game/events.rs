//! Local Event Fan-out
//!
//! One-to-many notification of state snapshots and auto-reveal timer changes
//! to in-process subscribers such as a UI. Every subscriber owns an unbounded
//! queue, so a slow reader never blocks the engine.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::game::state::State;

/// Event delivered to local subscribers.
#[derive(Clone, Debug)]
pub enum GameEvent {
    /// New snapshot. Values of hidden votes are already withheld.
    StateChanged(Arc<State>),
    /// All players voted; votes will be revealed after `delay`.
    AutoRevealScheduled {
        /// Time until reveal.
        delay: Duration,
    },
    /// A pending auto-reveal was called off.
    AutoRevealCancelled,
    /// The local player left the room; there is no state any more.
    RoomLeft,
}

/// Receiving end of a subscription. Yields `None` once the bus is closed.
pub type EventStream = mpsc::UnboundedReceiver<GameEvent>;

#[derive(Default)]
struct BusInner {
    subscribers: Vec<mpsc::UnboundedSender<GameEvent>>,
    closed: bool,
}

/// The fan-out bus.
#[derive(Default)]
pub struct EventBus {
    inner: Mutex<BusInner>,
}

impl EventBus {
    /// Create an open bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe, receiving `initial` first if given. Subscribing to a
    /// closed bus returns an already finished stream.
    pub fn subscribe(&self, initial: Option<GameEvent>) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.closed {
            return rx;
        }
        if let Some(event) = initial {
            let _ = tx.send(event);
        }
        inner.subscribers.push(tx);
        rx
    }

    /// Deliver `event` to every live subscriber, forgetting dropped ones.
    pub fn publish(&self, event: GameEvent) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Close the bus. Subscribers drain what is queued and then see `None`.
    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.closed = true;
        inner.subscribers.clear();
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.subscribers.len()
    }
}
