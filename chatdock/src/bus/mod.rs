//! Server-push event bus collaborator.
//!
//! The bus exposes two change streams ([`Topic::MessageInserted`] and
//! [`Topic::ProfileUpdated`]). A subscription yields opaque byte frames;
//! [`pump`] decodes them with the change-feed codec and hands each
//! [`ChangeEvent`] to a [`ChangeHandler`].

pub mod memory;

use std::sync::Arc;

use tokio::sync::mpsc;

use chatdock_proto::codec;
use chatdock_proto::event::{ChangeEvent, Topic};

/// Handle identifying one subscription on a bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Creates a subscription handle from its raw value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// An active subscription to one topic.
#[derive(Debug)]
pub struct Subscription {
    /// Handle to pass to [`EventBus::unsubscribe`].
    pub id: SubscriptionId,
    /// The subscribed topic.
    pub topic: Topic,
    /// Encoded change-feed frames, in publish order.
    pub frames: mpsc::Receiver<Vec<u8>>,
}

/// Errors that can occur when setting up a subscription.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    /// The bus refused the subscription.
    #[error("subscription rejected: {0}")]
    Rejected(String),

    /// The connection to the bus is closed.
    #[error("event bus connection closed")]
    Closed,
}

/// Async subscribe/unsubscribe access to the change feed.
pub trait EventBus: Send + Sync {
    /// Subscribe to a topic.
    fn subscribe(
        &self,
        topic: Topic,
    ) -> impl std::future::Future<Output = Result<Subscription, BusError>> + Send;

    /// Release a subscription. Unknown or already released handles are ignored.
    fn unsubscribe(&self, id: SubscriptionId) -> impl std::future::Future<Output = ()> + Send;
}

/// Receiver of decoded change events.
pub trait ChangeHandler: Send + Sync + 'static {
    /// Handle one change event. Must not fail; errors are logged internally.
    fn on_change(&self, event: ChangeEvent) -> impl std::future::Future<Output = ()> + Send;
}

/// Drive a subscription until the bus closes it, feeding every decoded
/// event to `handler` one at a time.
///
/// Frames that fail to decode are logged and skipped.
pub async fn pump<H: ChangeHandler>(mut subscription: Subscription, handler: Arc<H>) {
    while let Some(frame) = subscription.frames.recv().await {
        match codec::decode(&frame) {
            Ok(event) => handler.on_change(event).await,
            Err(e) => {
                tracing::warn!(
                    subscription = %subscription.id,
                    topic = %subscription.topic,
                    error = %e,
                    "dropping undecodable change frame"
                );
            }
        }
    }
    tracing::warn!(
        subscription = %subscription.id,
        topic = %subscription.topic,
        "change feed closed"
    );
}
