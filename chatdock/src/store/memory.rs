//! In-memory implementation of [`PersistentStore`].
//!
//! Holds profiles, friendships and message rows in process memory and
//! assigns persisted ids in insertion order. When a feed is attached, every
//! message insert and presence change is published on it, mirroring the
//! hosted service's realtime change stream.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use chatdock_proto::contact::{Contact, ContactId, PresenceUpdate};
use chatdock_proto::event::ChangeEvent;
use chatdock_proto::key::ConversationKey;
use chatdock_proto::message::{Message, PersistedId, Timestamp};

use super::{PersistentStore, StoreError, UnreadCount};
use crate::bus::memory::InMemoryBus;
use crate::clock::{Clock, SystemClock};

/// A stored message together with its read flag.
#[derive(Debug, Clone)]
struct StoredRow {
    message: Message,
    read: bool,
}

#[derive(Debug, Default)]
struct StoreState {
    profiles: HashMap<ContactId, Contact>,
    friends: HashMap<ContactId, BTreeSet<ContactId>>,
    rows: Vec<StoredRow>,
    next_id: u64,
}

/// In-memory [`PersistentStore`] for tests and the demo binary.
///
/// Not persistent: all data is lost when the process exits. The store can
/// be switched offline with [`set_offline`](Self::set_offline), after which
/// every call fails with [`StoreError::Unavailable`].
pub struct InMemoryStore {
    state: Mutex<StoreState>,
    offline: AtomicBool,
    feed: Option<Arc<InMemoryBus>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryStore {
    /// Creates an empty store with no attached feed.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            offline: AtomicBool::new(false),
            feed: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Publishes change events for inserts and presence changes on `feed`.
    #[must_use]
    pub fn with_feed(mut self, feed: Arc<InMemoryBus>) -> Self {
        self.feed = Some(feed);
        self
    }

    /// Stamps inserted rows with `clock` instead of the system time.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Adds or replaces a profile.
    pub fn add_profile(&self, contact: Contact) {
        self.state.lock().profiles.insert(contact.id.clone(), contact);
    }

    /// Records a mutual friendship between `a` and `b`.
    pub fn add_friendship(&self, a: &ContactId, b: &ContactId) {
        let mut state = self.state.lock();
        state.friends.entry(a.clone()).or_default().insert(b.clone());
        state.friends.entry(b.clone()).or_default().insert(a.clone());
    }

    /// Simulates losing (or regaining) the connection to the store.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Inserts a row with an explicit timestamp, bypassing the clock.
    ///
    /// The row is published on the feed like any other insert.
    pub fn seed_message(
        &self,
        sender: &ContactId,
        receiver: &ContactId,
        content: &str,
        created_at: Timestamp,
    ) -> Message {
        let message = {
            let mut state = self.state.lock();
            state.next_id += 1;
            let message = Message::persisted(
                PersistedId::new(state.next_id.to_string()),
                sender.clone(),
                receiver.clone(),
                content.to_string(),
                created_at,
            );
            state.rows.push(StoredRow {
                message: message.clone(),
                read: false,
            });
            message
        };
        self.publish(&ChangeEvent::MessageInserted(message.clone()));
        message
    }

    /// Changes a profile's online flag and publishes the update.
    ///
    /// Unlike [`PersistentStore::set_presence`] this ignores the offline
    /// switch; it models the contact's own client writing their flag.
    pub fn update_presence(&self, id: &ContactId, online: bool) {
        let changed = match self.state.lock().profiles.get_mut(id) {
            Some(profile) => {
                profile.online = online;
                true
            }
            None => false,
        };
        if changed {
            self.publish(&ChangeEvent::ProfileUpdated(PresenceUpdate::new(
                id.clone(),
                online,
            )));
        }
    }

    /// Changes a profile's online flag without publishing anything, as if
    /// the realtime event for it was lost.
    pub fn update_presence_silently(&self, id: &ContactId, online: bool) {
        if let Some(profile) = self.state.lock().profiles.get_mut(id) {
            profile.online = online;
        }
    }

    /// Number of unread rows from `sender` to `receiver`.
    #[must_use]
    pub fn unread_between(&self, receiver: &ContactId, sender: &ContactId) -> usize {
        self.state
            .lock()
            .rows
            .iter()
            .filter(|row| {
                !row.read && row.message.receiver == *receiver && row.message.sender == *sender
            })
            .count()
    }

    /// Total number of stored message rows.
    #[must_use]
    pub fn message_count(&self) -> usize {
        self.state.lock().rows.len()
    }

    fn ensure_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("store is offline".into()))
        } else {
            Ok(())
        }
    }

    fn publish(&self, event: &ChangeEvent) {
        if let Some(feed) = &self.feed {
            feed.publish(event);
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PersistentStore for InMemoryStore {
    async fn query_messages(&self, key: &ConversationKey) -> Result<Vec<Message>, StoreError> {
        self.ensure_online()?;
        let mut messages: Vec<Message> = self
            .state
            .lock()
            .rows
            .iter()
            .filter(|row| row.message.conversation == *key)
            .map(|row| row.message.clone())
            .collect();
        messages.sort_by_key(|m| m.created_at);
        Ok(messages)
    }

    async fn insert_message(
        &self,
        key: &ConversationKey,
        sender: &ContactId,
        receiver: &ContactId,
        content: &str,
    ) -> Result<Message, StoreError> {
        self.ensure_online()?;
        if ConversationKey::between(sender, receiver) != *key {
            return Err(StoreError::WriteFailed(format!(
                "conversation {key} does not belong to {sender} and {receiver}"
            )));
        }
        Ok(self.seed_message(sender, receiver, content, self.clock.now()))
    }

    async fn mark_read(&self, receiver: &ContactId, sender: &ContactId) -> Result<(), StoreError> {
        self.ensure_online()?;
        for row in &mut self.state.lock().rows {
            if row.message.receiver == *receiver && row.message.sender == *sender {
                row.read = true;
            }
        }
        Ok(())
    }

    async fn query_unread_counts(&self, receiver: &ContactId) -> Result<Vec<UnreadCount>, StoreError> {
        self.ensure_online()?;
        let mut counts: HashMap<ContactId, u32> = HashMap::new();
        for row in &self.state.lock().rows {
            if !row.read && row.message.receiver == *receiver {
                *counts.entry(row.message.sender.clone()).or_default() += 1;
            }
        }
        let mut counts: Vec<UnreadCount> = counts
            .into_iter()
            .map(|(sender, count)| UnreadCount { sender, count })
            .collect();
        counts.sort_by(|a, b| a.sender.cmp(&b.sender));
        Ok(counts)
    }

    async fn query_friends_with_presence(&self, user: &ContactId) -> Result<Vec<Contact>, StoreError> {
        self.ensure_online()?;
        let state = self.state.lock();
        let Some(friend_ids) = state.friends.get(user) else {
            return Ok(Vec::new());
        };
        Ok(friend_ids
            .iter()
            .filter_map(|id| state.profiles.get(id).cloned())
            .collect())
    }

    async fn query_presence(&self, ids: &[ContactId]) -> Result<Vec<PresenceUpdate>, StoreError> {
        self.ensure_online()?;
        let state = self.state.lock();
        Ok(ids
            .iter()
            .filter_map(|id| {
                state
                    .profiles
                    .get(id)
                    .map(|profile| PresenceUpdate::new(id.clone(), profile.online))
            })
            .collect())
    }

    async fn set_presence(&self, user: &ContactId, online: bool) -> Result<(), StoreError> {
        self.ensure_online()?;
        if !self.state.lock().profiles.contains_key(user) {
            return Err(StoreError::NotFound(format!("profile {user}")));
        }
        self.update_presence(user, online);
        Ok(())
    }
}
