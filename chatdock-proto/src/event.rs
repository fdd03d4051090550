//! Change-feed events pushed by the hosted service.

use serde::{Deserialize, Serialize};

use crate::contact::PresenceUpdate;
use crate::message::Message;

/// A change stream that can be subscribed to on the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    /// A message row was inserted.
    MessageInserted,
    /// A profile row (including its online flag) was updated.
    ProfileUpdated,
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MessageInserted => write!(f, "message-inserted"),
            Self::ProfileUpdated => write!(f, "profile-updated"),
        }
    }
}

/// One change delivered on a topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeEvent {
    /// A persisted message row.
    MessageInserted(Message),
    /// A profile's new online flag.
    ProfileUpdated(PresenceUpdate),
}

impl ChangeEvent {
    /// Returns the topic this event is published on.
    #[must_use]
    pub const fn topic(&self) -> Topic {
        match self {
            Self::MessageInserted(_) => Topic::MessageInserted,
            Self::ProfileUpdated(_) => Topic::ProfileUpdated,
        }
    }
}
