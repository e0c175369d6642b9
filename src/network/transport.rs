//! Pub/Sub Transport
//!
//! The engine only needs three things from the network: subscribe to a
//! room's topic, and publish bytes to it with or without payload encryption.
//! Delivery may be late, duplicated or reordered; nothing above this layer
//! relies on it being otherwise.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::trace;

use crate::core::room::{Room, RoomId};

/// Transport errors.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Subscription could not be established.
    #[error("subscribe failed: {0}")]
    Subscribe(String),
    /// Publishing failed.
    #[error("publish failed: {0}")]
    Publish(String),
}

/// A live topic subscription. Dropping it unsubscribes.
pub struct Subscription {
    messages: mpsc::UnboundedReceiver<Vec<u8>>,
    unsubscribe: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Wrap a receiver and an unsubscribe callback.
    pub fn new(
        messages: mpsc::UnboundedReceiver<Vec<u8>>,
        unsubscribe: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            messages,
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    /// Next payload, `None` when the transport closed the subscription.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.messages.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

/// Room-scoped publish/subscribe.
pub trait Transport: Send + Sync {
    /// Subscribe to every message published to `room`.
    fn subscribe(&self, room: &Room) -> Result<Subscription, TransportError>;

    /// Publish `payload` in clear.
    fn publish_unencrypted_message(&self, room: &Room, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Publish `payload` encrypted with the room's symmetric key.
    fn publish_public_message(&self, room: &Room, payload: Vec<u8>) -> Result<(), TransportError>;
}

// =============================================================================
// IN-MEMORY TRANSPORT
// =============================================================================

struct Subscriber {
    peer: usize,
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

#[derive(Default)]
struct HubInner {
    topics: BTreeMap<RoomId, BTreeMap<u64, Subscriber>>,
}

/// In-process message relay shared by several peers.
///
/// Like a gossip relay, a message is delivered to every subscriber of the
/// room except the peer that published it. No cipher is applied: both
/// publish variants carry the same bytes, only counted separately.
#[derive(Clone, Default)]
pub struct MemoryHub {
    inner: Arc<Mutex<HubInner>>,
    next_peer: Arc<AtomicUsize>,
    next_subscription: Arc<AtomicU64>,
}

impl MemoryHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// New peer endpoint on this hub.
    pub fn connect(&self) -> MemoryTransport {
        MemoryTransport {
            hub: self.clone(),
            peer: self.next_peer.fetch_add(1, Ordering::SeqCst),
            encrypted: Arc::new(AtomicUsize::new(0)),
            unencrypted: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of live subscriptions on `room`.
    pub fn subscriber_count(&self, room: &Room) -> usize {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.topics.get(&room.id()).map_or(0, BTreeMap::len)
    }

    fn deliver(&self, from: usize, room: &RoomId, payload: Vec<u8>) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(subscribers) = inner.topics.get_mut(room) {
            subscribers.retain(|_, s| s.peer == from || s.tx.send(payload.clone()).is_ok());
            trace!(room = %room, bytes = payload.len(), receivers = subscribers.len(), "delivered");
        }
    }
}

/// One peer's endpoint on a [`MemoryHub`].
#[derive(Clone)]
pub struct MemoryTransport {
    hub: MemoryHub,
    peer: usize,
    encrypted: Arc<AtomicUsize>,
    unencrypted: Arc<AtomicUsize>,
}

impl MemoryTransport {
    /// Messages this peer published with encryption.
    pub fn encrypted_count(&self) -> usize {
        self.encrypted.load(Ordering::SeqCst)
    }

    /// Messages this peer published in clear.
    pub fn unencrypted_count(&self) -> usize {
        self.unencrypted.load(Ordering::SeqCst)
    }
}

impl Transport for MemoryTransport {
    fn subscribe(&self, room: &Room) -> Result<Subscription, TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.hub.next_subscription.fetch_add(1, Ordering::SeqCst);
        let topic = room.id();
        {
            let mut inner = self.hub.inner.lock().unwrap_or_else(PoisonError::into_inner);
            inner
                .topics
                .entry(topic.clone())
                .or_default()
                .insert(id, Subscriber { peer: self.peer, tx });
        }

        let hub = self.hub.clone();
        Ok(Subscription::new(rx, move || {
            let mut inner = hub.inner.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(subscribers) = inner.topics.get_mut(&topic) {
                subscribers.remove(&id);
            }
        }))
    }

    fn publish_unencrypted_message(&self, room: &Room, payload: Vec<u8>) -> Result<(), TransportError> {
        self.unencrypted.fetch_add(1, Ordering::SeqCst);
        self.hub.deliver(self.peer, &room.id(), payload);
        Ok(())
    }

    fn publish_public_message(&self, room: &Room, payload: Vec<u8>) -> Result<(), TransportError> {
        self.encrypted.fetch_add(1, Ordering::SeqCst);
        self.hub.deliver(self.peer, &room.id(), payload);
        Ok(())
    }
}
