//! Integration tests for the optimistic send pipeline and incoming messages.
//!
//! Verifies:
//! 1. A sent message is visible before the store write resolves.
//! 2. A failed write removes the message and restores the draft exactly.
//! 3. A successful write replaces the pending message in place.
//! 4. Incoming messages are deduplicated and kept in timestamp order.
//! 5. Alerts fire only for hidden windows, with sound on and the user online.

use std::sync::Arc;

use chatdock::bus::memory::InMemoryBus;
use chatdock::chat::SendError;
use chatdock::clock::ManualClock;
use chatdock::events::SessionEvent;
use chatdock::session::{ChatSession, SessionOptions};
use chatdock::store::memory::InMemoryStore;
use chatdock::store::{PersistentStore, StoreError, UnreadCount};
use chatdock_proto::contact::{Contact, ContactId, PresenceUpdate};
use chatdock_proto::key::ConversationKey;
use chatdock_proto::message::{DeliveryState, Message, Timestamp};

use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn id(s: &str) -> ContactId {
    ContactId::new(s)
}

/// Store whose message writes never resolve.
struct StalledStore {
    inner: InMemoryStore,
}

impl PersistentStore for StalledStore {
    async fn query_messages(&self, key: &ConversationKey) -> Result<Vec<Message>, StoreError> {
        self.inner.query_messages(key).await
    }

    async fn insert_message(
        &self,
        _key: &ConversationKey,
        _sender: &ContactId,
        _receiver: &ContactId,
        _content: &str,
    ) -> Result<Message, StoreError> {
        std::future::pending().await
    }

    async fn mark_read(&self, receiver: &ContactId, sender: &ContactId) -> Result<(), StoreError> {
        self.inner.mark_read(receiver, sender).await
    }

    async fn query_unread_counts(&self, receiver: &ContactId) -> Result<Vec<UnreadCount>, StoreError> {
        self.inner.query_unread_counts(receiver).await
    }

    async fn query_friends_with_presence(&self, user: &ContactId) -> Result<Vec<Contact>, StoreError> {
        self.inner.query_friends_with_presence(user).await
    }

    async fn query_presence(&self, ids: &[ContactId]) -> Result<Vec<PresenceUpdate>, StoreError> {
        self.inner.query_presence(ids).await
    }

    async fn set_presence(&self, user: &ContactId, online: bool) -> Result<(), StoreError> {
        self.inner.set_presence(user, online).await
    }
}

fn seed(store: &InMemoryStore) {
    store.add_profile(Contact::new("alice", "Alice"));
    store.add_profile(Contact::new("bob", "Bob").with_online(true));
    store.add_friendship(&id("alice"), &id("bob"));
}

type Session = ChatSession<InMemoryStore, InMemoryBus>;

/// Alice's started session over a feed-connected in-memory backend.
async fn started_session(
    options: SessionOptions,
) -> (Arc<InMemoryStore>, Session, mpsc::Receiver<SessionEvent>) {
    let bus = Arc::new(InMemoryBus::new());
    let store = Arc::new(
        InMemoryStore::new()
            .with_feed(Arc::clone(&bus))
            .with_clock(Arc::new(ManualClock::new(10_000))),
    );
    seed(&store);
    let (session, events) = ChatSession::new(id("alice"), Arc::clone(&store), bus, options);
    session.start().await;
    (store, session, events)
}

fn default_options() -> SessionOptions {
    SessionOptions::default().with_clock(Arc::new(ManualClock::new(10_000)))
}

async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

fn drain(rx: &mut mpsc::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn alerts(events: &[SessionEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, SessionEvent::Alert { .. }))
        .count()
}

// ---------------------------------------------------------------------------
// Sending
// ---------------------------------------------------------------------------

#[tokio::test]
async fn pending_message_is_visible_before_write_resolves() {
    let inner = InMemoryStore::new();
    seed(&inner);
    let store = Arc::new(StalledStore { inner });
    let bus = Arc::new(InMemoryBus::new());
    let (session, _events) = ChatSession::new(id("alice"), store, bus, default_options());
    session.start().await;
    session.open(&id("bob")).await;

    let pending = session.begin_send(&id("bob"), "hola").unwrap();
    let messages = session.messages(&id("bob"));
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].content, "hola");
    assert_eq!(messages[0].delivery_state(), DeliveryState::Pending);

    // A hung write leaves the message pending.
    let result =
        tokio::time::timeout(std::time::Duration::from_millis(20), session.dispatch(pending)).await;
    assert!(result.is_err());
    assert_eq!(
        session.messages(&id("bob"))[0].delivery_state(),
        DeliveryState::Pending
    );
}

#[tokio::test]
async fn rejected_write_rolls_back_and_restores_draft() {
    let (store, session, mut events) = started_session(default_options()).await;
    session.open(&id("bob")).await;
    session.set_draft(&id("bob"), "hola");
    drain(&mut events);

    store.set_offline(true);
    let result = session.send(&id("bob"), "hola").await;

    assert!(matches!(result, Err(SendError::Store(StoreError::Unavailable(_)))));
    assert!(session.messages(&id("bob")).is_empty());
    assert_eq!(session.window(&id("bob")).unwrap().draft, "hola");

    let events = drain(&mut events);
    assert!(matches!(events[0], SessionEvent::MessageAppended { .. }));
    assert!(events.iter().any(|e| matches!(
        e,
        SessionEvent::SendFailed { draft, .. } if draft == "hola"
    )));
}

#[tokio::test]
async fn confirmed_message_replaces_pending_in_place() {
    let (store, session, _events) = started_session(default_options()).await;
    store.seed_message(&id("bob"), &id("alice"), "earlier", Timestamp::from_millis(5_000));
    session.open(&id("bob")).await;

    let pending = session.begin_send(&id("bob"), "hola").unwrap();
    assert_eq!(session.messages(&id("bob")).len(), 2);

    let stored = session.dispatch(pending).await.unwrap();
    settle().await;

    let messages = session.messages(&id("bob"));
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].id, stored.id);
    assert_eq!(messages[1].delivery_state(), DeliveryState::Confirmed);
    assert_eq!(store.message_count(), 2);
}

#[tokio::test]
async fn own_echo_is_not_duplicated() {
    let (_store, session, _events) = started_session(default_options()).await;
    session.open(&id("bob")).await;

    session.send(&id("bob"), "first").await.unwrap();
    session.send(&id("bob"), "second").await.unwrap();
    settle().await;

    let contents: Vec<String> = session
        .messages(&id("bob"))
        .into_iter()
        .map(|m| m.content)
        .collect();
    assert_eq!(contents, vec!["first", "second"]);
}

#[tokio::test]
async fn blank_message_is_a_no_op() {
    let (store, session, _events) = started_session(default_options()).await;
    session.open(&id("bob")).await;

    assert!(matches!(
        session.send(&id("bob"), "  \n ").await,
        Err(SendError::Validation(_))
    ));
    assert!(session.messages(&id("bob")).is_empty());
    assert_eq!(store.message_count(), 0);
}

// ---------------------------------------------------------------------------
// Receiving
// ---------------------------------------------------------------------------

#[tokio::test]
async fn incoming_messages_keep_timestamp_order() {
    let (store, session, _events) = started_session(default_options()).await;
    session.open(&id("bob")).await;

    store.seed_message(&id("bob"), &id("alice"), "second", Timestamp::from_millis(2_000));
    store.seed_message(&id("bob"), &id("alice"), "first", Timestamp::from_millis(1_000));
    store.seed_message(&id("bob"), &id("alice"), "third", Timestamp::from_millis(3_000));
    settle().await;

    let contents: Vec<String> = session
        .messages(&id("bob"))
        .into_iter()
        .map(|m| m.content)
        .collect();
    assert_eq!(contents, vec!["first", "second", "third"]);
}

#[tokio::test]
async fn message_for_closed_window_is_not_cached() {
    let (store, session, _events) = started_session(default_options()).await;
    store.seed_message(&id("bob"), &id("alice"), "hi", Timestamp::from_millis(1_000));
    settle().await;

    assert!(session.messages(&id("bob")).is_empty());
    assert_eq!(session.unread_count(&id("bob")), 1);
}

#[tokio::test]
async fn alert_only_when_window_hidden() {
    let (store, session, mut events) = started_session(default_options()).await;

    // No window: alert.
    store.seed_message(&id("bob"), &id("alice"), "one", Timestamp::from_millis(1_000));
    settle().await;
    assert_eq!(alerts(&drain(&mut events)), 1);

    // Expanded window: no alert.
    session.open(&id("bob")).await;
    store.seed_message(&id("bob"), &id("alice"), "two", Timestamp::from_millis(2_000));
    settle().await;
    assert_eq!(alerts(&drain(&mut events)), 0);

    // Minimized window: alert.
    session.minimize(&id("bob"));
    store.seed_message(&id("bob"), &id("alice"), "three", Timestamp::from_millis(3_000));
    settle().await;
    assert_eq!(alerts(&drain(&mut events)), 1);

    // Own messages never alert.
    session.send(&id("bob"), "mine").await.unwrap();
    settle().await;
    assert_eq!(alerts(&drain(&mut events)), 0);
}

#[tokio::test]
async fn no_alert_when_sound_disabled_or_user_offline() {
    let (store, session, mut events) = started_session(default_options()).await;

    session.set_sound_enabled(false).unwrap();
    store.seed_message(&id("bob"), &id("alice"), "quiet", Timestamp::from_millis(1_000));
    settle().await;
    assert_eq!(alerts(&drain(&mut events)), 0);

    session.set_sound_enabled(true).unwrap();
    session.set_presence(false).await;
    store.seed_message(&id("bob"), &id("alice"), "away", Timestamp::from_millis(2_000));
    settle().await;
    assert_eq!(alerts(&drain(&mut events)), 0);
}

#[tokio::test]
async fn sound_preference_survives_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("preferences.json");
    let options = || SessionOptions {
        preferences: Some(chatdock::notify::PreferenceFile::new(&path)),
        ..default_options()
    };

    let (_store, first, _events) = started_session(options()).await;
    assert!(first.sound_enabled());
    first.set_sound_enabled(false).unwrap();
    first.shutdown().await;

    let (_store, second, _events) = started_session(options()).await;
    assert!(!second.sound_enabled());
}
