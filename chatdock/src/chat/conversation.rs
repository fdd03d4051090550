//! Message history for open conversations.
//!
//! [`ConversationStore`] keeps one ordered message list per tracked
//! conversation. Every mutation goes through [`reduce`], a single reducer
//! over [`MessageAction`]s that keeps the list in non-decreasing
//! `created_at` order and free of duplicate ids:
//!
//! - `Append` adds a local pending message.
//! - `Incoming` adds a pushed or loaded row, skipping ids already present.
//! - `Confirm` promotes a pending message to its persisted form in place.
//! - `Reject` removes a pending message after a failed write.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use chatdock_proto::key::ConversationKey;
use chatdock_proto::message::{Message, MessageId, TempId};

use crate::store::{PersistentStore, StoreError};

/// A mutation of one conversation's message list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageAction {
    /// A locally created pending message.
    Append(Message),
    /// A message observed from the store or the change feed.
    Incoming(Message),
    /// The write for a pending message succeeded.
    Confirm {
        /// Temporary id the pending message was appended under.
        temp_id: TempId,
        /// The stored row returned by the store.
        message: Message,
    },
    /// The write for a pending message failed.
    Reject {
        /// Temporary id of the message to remove.
        temp_id: TempId,
    },
}

/// What [`reduce`] did with an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reduced {
    /// A new entry was inserted.
    Inserted,
    /// The id was already present; nothing changed.
    Duplicate,
    /// A pending entry was replaced by its persisted form.
    Confirmed,
    /// The persisted form was already present (its echo arrived first),
    /// so the pending entry was dropped.
    Merged,
    /// A pending entry was removed.
    Removed,
    /// No pending entry with the given temporary id exists.
    Missing,
}

/// Applies one action to an ordered message list.
pub fn reduce(messages: &mut Vec<Message>, action: MessageAction) -> Reduced {
    match action {
        MessageAction::Append(message) | MessageAction::Incoming(message) => {
            if contains(messages, &message.id) {
                Reduced::Duplicate
            } else {
                insert_ordered(messages, message);
                Reduced::Inserted
            }
        }
        MessageAction::Confirm { temp_id, message } => {
            let Some(index) = position_of_pending(messages, &temp_id) else {
                return match reduce(messages, MessageAction::Incoming(message)) {
                    Reduced::Inserted => Reduced::Inserted,
                    _ => Reduced::Missing,
                };
            };
            if contains(messages, &message.id) {
                messages.remove(index);
                return Reduced::Merged;
            }
            messages[index] = message;
            if !in_order_at(messages, index) {
                let message = messages.remove(index);
                insert_ordered(messages, message);
            }
            Reduced::Confirmed
        }
        MessageAction::Reject { temp_id } => match position_of_pending(messages, &temp_id) {
            Some(index) => {
                messages.remove(index);
                Reduced::Removed
            }
            None => Reduced::Missing,
        },
    }
}

fn contains(messages: &[Message], id: &MessageId) -> bool {
    messages.iter().any(|m| m.id == *id)
}

fn position_of_pending(messages: &[Message], temp_id: &TempId) -> Option<usize> {
    messages.iter().position(|m| m.temp_id() == Some(temp_id))
}

/// Inserts after every entry with an equal or earlier timestamp, so
/// same-millisecond messages keep their arrival order.
fn insert_ordered(messages: &mut Vec<Message>, message: Message) {
    let at = messages.partition_point(|m| m.created_at <= message.created_at);
    messages.insert(at, message);
}

fn in_order_at(messages: &[Message], index: usize) -> bool {
    let at = messages[index].created_at;
    let after_prev = index == 0 || messages[index - 1].created_at <= at;
    let before_next = messages.get(index + 1).is_none_or(|next| at <= next.created_at);
    after_prev && before_next
}

/// Outcome of [`ConversationStore::load_history`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryLoad {
    /// The history was merged; the list now holds this many messages.
    Loaded(usize),
    /// The conversation was released while the query was in flight.
    Discarded,
}

/// Message lists of the currently tracked conversations.
pub struct ConversationStore<S> {
    store: Arc<S>,
    conversations: Mutex<HashMap<ConversationKey, Vec<Message>>>,
}

impl<S: PersistentStore> ConversationStore<S> {
    /// Creates an empty store reading history through `store`.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            conversations: Mutex::new(HashMap::new()),
        }
    }

    /// Starts tracking a conversation. Returns `false` if it already was.
    pub fn track(&self, key: &ConversationKey) -> bool {
        let mut conversations = self.conversations.lock();
        if conversations.contains_key(key) {
            return false;
        }
        conversations.insert(key.clone(), Vec::new());
        true
    }

    /// Stops tracking a conversation and drops its cached messages.
    pub fn release(&self, key: &ConversationKey) -> bool {
        self.conversations.lock().remove(key).is_some()
    }

    /// Whether the conversation is tracked.
    #[must_use]
    pub fn is_tracked(&self, key: &ConversationKey) -> bool {
        self.conversations.lock().contains_key(key)
    }

    /// Queries the persisted history and merges it into the cached list.
    ///
    /// Entries that arrived while the query was in flight (pending sends,
    /// pushed messages) are kept. If the conversation was released in the
    /// meantime the result is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails; the cached list is left
    /// as it was.
    pub async fn load_history(&self, key: &ConversationKey) -> Result<HistoryLoad, StoreError> {
        let rows = self.store.query_messages(key).await?;

        let mut conversations = self.conversations.lock();
        let Some(messages) = conversations.get_mut(key) else {
            tracing::debug!(conversation = %key, "discarding history for released conversation");
            return Ok(HistoryLoad::Discarded);
        };
        let cached = std::mem::replace(messages, rows);
        for message in cached {
            reduce(messages, MessageAction::Incoming(message));
        }
        let count = messages.len();
        drop(conversations);

        tracing::debug!(conversation = %key, count, "history loaded");
        Ok(HistoryLoad::Loaded(count))
    }

    /// Applies an action to a tracked conversation.
    ///
    /// Returns `None` if the conversation is not tracked.
    pub fn apply(&self, key: &ConversationKey, action: MessageAction) -> Option<Reduced> {
        let mut conversations = self.conversations.lock();
        let messages = conversations.get_mut(key)?;
        Some(reduce(messages, action))
    }

    /// Snapshot of a conversation's messages in display order.
    #[must_use]
    pub fn messages(&self, key: &ConversationKey) -> Vec<Message> {
        self.conversations
            .lock()
            .get(key)
            .cloned()
            .unwrap_or_default()
    }
}
