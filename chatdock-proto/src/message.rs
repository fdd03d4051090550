//! Direct-message types shared by the client core and the change feed.
//!
//! A [`Message`] is addressed by a [`MessageId`] that is either a
//! client-generated [`TempId`] (the optimistic copy shown before the store
//! confirms the write) or the store-assigned [`PersistedId`].

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::contact::ContactId;
use crate::key::ConversationKey;

/// Default maximum message length in characters.
pub const DEFAULT_MAX_MESSAGE_LEN: usize = 4000;

/// Client-generated identifier for a message that has not been persisted.
///
/// UUID v7: a millisecond timestamp followed by 74 random bits, so two
/// sends issued in the same millisecond still get distinct ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TempId(Uuid);

impl TempId {
    /// Generates a fresh temporary identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a `TempId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for TempId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TempId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tmp-{}", self.0)
    }
}

/// Identifier assigned by the persistent store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PersistedId(String);

impl PersistedId {
    /// Creates a persisted identifier from its string form.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the string form of this identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PersistedId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a message in a conversation list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageId {
    /// Optimistic local copy awaiting the store write.
    Pending(TempId),
    /// Row confirmed by the store.
    Confirmed(PersistedId),
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending(id) => write!(f, "{id}"),
            Self::Confirmed(id) => write!(f, "{id}"),
        }
    }
}

/// Delivery lifecycle of a message in a conversation list.
///
/// There is no failed state: a message whose write fails is removed from
/// the list and the client reports the failure separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeliveryState {
    /// Shown locally, store write in flight.
    Pending,
    /// Store write succeeded.
    Confirmed,
}

impl std::fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Confirmed => write!(f, "confirmed"),
        }
    }
}

/// Millisecond-precision UTC timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Creates a timestamp for the current instant.
    #[must_use]
    pub fn now() -> Self {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    /// Creates a timestamp from milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// A direct message between two participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Temporary or persisted identity.
    pub id: MessageId,
    /// Conversation this message belongs to.
    pub conversation: ConversationKey,
    /// Author of the message.
    pub sender: ContactId,
    /// Addressee of the message.
    pub receiver: ContactId,
    /// Message text.
    pub content: String,
    /// Creation time; the authoritative display order.
    pub created_at: Timestamp,
}

impl Message {
    /// Builds the optimistic local copy of an outgoing message.
    #[must_use]
    pub fn pending(
        sender: ContactId,
        receiver: ContactId,
        content: String,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id: MessageId::Pending(TempId::new()),
            conversation: ConversationKey::between(&sender, &receiver),
            sender,
            receiver,
            content,
            created_at,
        }
    }

    /// Builds a message row as stored by the persistent store.
    #[must_use]
    pub fn persisted(
        id: PersistedId,
        sender: ContactId,
        receiver: ContactId,
        content: String,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id: MessageId::Confirmed(id),
            conversation: ConversationKey::between(&sender, &receiver),
            sender,
            receiver,
            content,
            created_at,
        }
    }

    /// Returns the delivery state implied by the message identity.
    #[must_use]
    pub const fn delivery_state(&self) -> DeliveryState {
        match self.id {
            MessageId::Pending(_) => DeliveryState::Pending,
            MessageId::Confirmed(_) => DeliveryState::Confirmed,
        }
    }

    /// Returns the temporary id if this is still an optimistic copy.
    #[must_use]
    pub const fn temp_id(&self) -> Option<&TempId> {
        match &self.id {
            MessageId::Pending(id) => Some(id),
            MessageId::Confirmed(_) => None,
        }
    }

    /// Returns the participant on the other side of the conversation from `me`.
    #[must_use]
    pub fn counterpart(&self, me: &ContactId) -> &ContactId {
        if self.sender == *me {
            &self.receiver
        } else {
            &self.sender
        }
    }
}

/// Errors returned by [`validate_content`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// The text is empty or whitespace only.
    #[error("message text is empty")]
    Empty,
    /// The text exceeds the maximum length.
    #[error("message is {len} characters (max {max})")]
    TooLong {
        /// Actual length in characters.
        len: usize,
        /// Maximum allowed length in characters.
        max: usize,
    },
}

/// Checks that `text` is sendable: not blank and at most `max_len` characters.
///
/// # Errors
///
/// Returns [`ValidationError::Empty`] for blank text or
/// [`ValidationError::TooLong`] when the limit is exceeded.
pub fn validate_content(text: &str, max_len: usize) -> Result<(), ValidationError> {
    if text.trim().is_empty() {
        return Err(ValidationError::Empty);
    }
    let len = text.chars().count();
    if len > max_len {
        return Err(ValidationError::TooLong { len, max: max_len });
    }
    Ok(())
}
