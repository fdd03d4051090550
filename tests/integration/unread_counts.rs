//! Integration tests for unread counters.
//!
//! Verifies:
//! 1. Counts are loaded from the store at start and grouped by sender.
//! 2. Opening a window and explicit mark-as-read zero the count and
//!    persist the read state.
//! 3. A failed read-mark restores the badge.
//! 4. Incoming messages for hidden windows reload counts from the store;
//!    messages for an expanded window are marked read.
//! 5. Counts are recomputed from the store when the user comes back online.

use std::sync::Arc;

use chatdock::bus::memory::InMemoryBus;
use chatdock::events::SessionEvent;
use chatdock::session::{ChatSession, SessionOptions};
use chatdock::store::memory::InMemoryStore;
use chatdock_proto::contact::{Contact, ContactId};
use chatdock_proto::message::Timestamp;

use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

type Session = ChatSession<InMemoryStore, InMemoryBus>;

fn id(s: &str) -> ContactId {
    ContactId::new(s)
}

fn connected() -> (Arc<InMemoryStore>, Session, mpsc::Receiver<SessionEvent>) {
    let bus = Arc::new(InMemoryBus::new());
    let store = Arc::new(InMemoryStore::new().with_feed(Arc::clone(&bus)));
    store.add_profile(Contact::new("alice", "Alice"));
    store.add_profile(Contact::new("bob", "Bob"));
    store.add_profile(Contact::new("carol", "Carol"));
    store.add_friendship(&id("alice"), &id("bob"));
    store.add_friendship(&id("alice"), &id("carol"));
    let (session, events) =
        ChatSession::new(id("alice"), Arc::clone(&store), bus, SessionOptions::default());
    (store, session, events)
}

fn incoming(store: &InMemoryStore, from: &str, at: u64) {
    store.seed_message(&id(from), &id("alice"), "hi", Timestamp::from_millis(at));
}

async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn counts_are_loaded_at_start() {
    let (store, session, _events) = connected();
    incoming(&store, "bob", 1);
    incoming(&store, "bob", 2);
    incoming(&store, "carol", 3);
    session.start().await;

    assert_eq!(session.unread(), vec![(id("bob"), 2), (id("carol"), 1)]);
    assert_eq!(session.unread_total(), 3);
}

#[tokio::test]
async fn opening_window_marks_conversation_read() {
    let (store, session, _events) = connected();
    incoming(&store, "bob", 1);
    incoming(&store, "bob", 2);
    session.start().await;
    assert_eq!(session.unread_count(&id("bob")), 2);

    session.open(&id("bob")).await;
    assert_eq!(session.unread_count(&id("bob")), 0);
    assert_eq!(store.unread_between(&id("alice"), &id("bob")), 0);
}

#[tokio::test]
async fn explicit_mark_read_zeroes_one_sender() {
    let (store, session, _events) = connected();
    incoming(&store, "bob", 1);
    incoming(&store, "carol", 2);
    session.start().await;

    session.mark_read(&id("bob")).await.unwrap();
    assert_eq!(session.unread_count(&id("bob")), 0);
    assert_eq!(session.unread_count(&id("carol")), 1);
    assert_eq!(session.unread_total(), 1);
}

#[tokio::test]
async fn failed_mark_read_restores_badge() {
    let (store, session, mut events) = connected();
    incoming(&store, "bob", 1);
    incoming(&store, "bob", 2);
    session.start().await;
    while events.try_recv().is_ok() {}

    store.set_offline(true);
    assert!(session.mark_read(&id("bob")).await.is_err());
    assert_eq!(session.unread_count(&id("bob")), 2);

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::UnreadChanged { count, .. } = event {
            seen.push(count);
        }
    }
    assert_eq!(seen, vec![0, 2]);
}

#[tokio::test]
async fn incoming_for_hidden_window_reloads_from_store() {
    let (store, session, _events) = connected();
    session.start().await;

    incoming(&store, "bob", 1);
    settle().await;
    assert_eq!(session.unread_count(&id("bob")), 1);

    session.open(&id("bob")).await;
    session.minimize(&id("bob"));
    incoming(&store, "bob", 2);
    settle().await;
    assert_eq!(session.unread_count(&id("bob")), 1);

    session.restore(&id("bob"));
    incoming(&store, "bob", 3);
    settle().await;
    assert_eq!(session.unread_count(&id("bob")), 0);
}

#[tokio::test]
async fn visible_incoming_is_marked_read() {
    let (store, session, _events) = connected();
    session.start().await;
    session.open(&id("bob")).await;

    incoming(&store, "bob", 1);
    settle().await;
    assert_eq!(session.unread_count(&id("bob")), 0);
    assert_eq!(store.unread_between(&id("alice"), &id("bob")), 0);
    assert_eq!(session.messages(&id("bob")).len(), 1);
}

#[tokio::test]
async fn counts_are_recomputed_after_reconnect() {
    let (store, session, _events) = connected();
    session.start().await;
    session.set_presence(false).await;

    // Reloads triggered meanwhile fail; the rows are still recorded.
    store.set_offline(true);
    incoming(&store, "carol", 1);
    incoming(&store, "carol", 2);
    store.set_offline(false);

    session.set_presence(true).await;
    assert_eq!(session.unread_count(&id("carol")), 2);
}

#[tokio::test]
async fn counts_are_never_negative_or_stale_after_repeated_marks() {
    let (store, session, _events) = connected();
    incoming(&store, "bob", 1);
    session.start().await;

    session.mark_read(&id("bob")).await.unwrap();
    session.mark_read(&id("bob")).await.unwrap();
    session.open(&id("bob")).await;
    assert_eq!(session.unread_count(&id("bob")), 0);
    assert!(session.unread().is_empty());
}
