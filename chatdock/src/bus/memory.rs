//! In-process event bus.
//!
//! Fans published change events out to per-topic subscriber channels.
//! Pairs with [`InMemoryStore`](crate::store::memory::InMemoryStore), which
//! publishes a frame for every message insert and presence change.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use chatdock_proto::codec;
use chatdock_proto::event::{ChangeEvent, Topic};

use super::{BusError, EventBus, Subscription, SubscriptionId};

/// Default per-subscriber channel capacity.
const DEFAULT_SUBSCRIBER_BUFFER: usize = 256;

/// In-process [`EventBus`] backed by `tokio::sync::mpsc` channels.
///
/// Publishing never blocks: a subscriber whose channel is full misses the
/// frame, the same way a realtime feed drops events for a slow client.
pub struct InMemoryBus {
    subscribers: Mutex<HashMap<Topic, Vec<(SubscriptionId, mpsc::Sender<Vec<u8>>)>>>,
    next_id: AtomicU64,
    buffer: usize,
    rejecting: AtomicBool,
}

impl InMemoryBus {
    /// Creates a bus with the default subscriber buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::with_buffer(DEFAULT_SUBSCRIBER_BUFFER)
    }

    /// Creates a bus whose subscriber channels hold at most `buffer` frames.
    #[must_use]
    pub fn with_buffer(buffer: usize) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
            rejecting: AtomicBool::new(false),
        }
    }

    /// Makes subsequent [`subscribe`](EventBus::subscribe) calls fail.
    pub fn set_rejecting(&self, rejecting: bool) {
        self.rejecting.store(rejecting, Ordering::SeqCst);
    }

    /// Encodes `event` and delivers it to every subscriber of its topic.
    ///
    /// Returns the number of subscribers the frame was queued for.
    pub fn publish(&self, event: &ChangeEvent) -> usize {
        match codec::encode(event) {
            Ok(frame) => self.publish_frame(event.topic(), &frame),
            Err(e) => {
                tracing::warn!(topic = %event.topic(), error = %e, "failed to encode change event");
                0
            }
        }
    }

    /// Delivers a raw frame to every subscriber of `topic`.
    pub fn publish_frame(&self, topic: Topic, frame: &[u8]) -> usize {
        let mut subscribers = self.subscribers.lock();
        let Some(list) = subscribers.get_mut(&topic) else {
            return 0;
        };
        list.retain(|(_, tx)| !tx.is_closed());

        let mut delivered = 0;
        for (id, tx) in list.iter() {
            match tx.try_send(frame.to_vec()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(subscription = %id, %topic, "subscriber lagging, frame dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        delivered
    }

    /// Drops every subscriber channel, as if the realtime connection broke.
    pub fn disconnect_all(&self) {
        self.subscribers.lock().clear();
    }

    /// Number of live subscriptions on `topic`.
    #[must_use]
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.subscribers
            .lock()
            .get(&topic)
            .map_or(0, |list| list.iter().filter(|(_, tx)| !tx.is_closed()).count())
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus for InMemoryBus {
    async fn subscribe(&self, topic: Topic) -> Result<Subscription, BusError> {
        if self.rejecting.load(Ordering::SeqCst) {
            return Err(BusError::Rejected(format!("{topic} unavailable")));
        }
        let id = SubscriptionId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = mpsc::channel(self.buffer);
        self.subscribers
            .lock()
            .entry(topic)
            .or_default()
            .push((id, tx));
        tracing::debug!(subscription = %id, %topic, "subscribed");
        Ok(Subscription {
            id,
            topic,
            frames: rx,
        })
    }

    async fn unsubscribe(&self, id: SubscriptionId) {
        let mut subscribers = self.subscribers.lock();
        for list in subscribers.values_mut() {
            list.retain(|(existing, _)| *existing != id);
        }
        tracing::debug!(subscription = %id, "unsubscribed");
    }
}
