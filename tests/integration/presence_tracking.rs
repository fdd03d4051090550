//! Integration tests for presence tracking through a chat session.
//!
//! Verifies:
//! 1. Pushes update a single contact; polls correct missed pushes.
//! 2. A push followed by an agreeing poll raises no notice.
//! 3. Disconnect notices appear and disappear with presence flips and
//!    are dropped when the window closes.
//! 4. Going offline or shutting down releases the poll timer and the
//!    subscription.
//! 5. A refused subscription still converges through polling.

use std::sync::Arc;
use std::time::Duration;

use chatdock::bus::memory::InMemoryBus;
use chatdock::clock::ManualClock;
use chatdock::events::SessionEvent;
use chatdock::session::{ChatSession, SessionOptions};
use chatdock::store::memory::InMemoryStore;
use chatdock_proto::contact::{Contact, ContactId};
use chatdock_proto::event::Topic;
use chatdock_proto::message::Timestamp;

use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

type Session = ChatSession<InMemoryStore, InMemoryBus>;

fn id(s: &str) -> ContactId {
    ContactId::new(s)
}

struct Harness {
    store: Arc<InMemoryStore>,
    bus: Arc<InMemoryBus>,
    clock: Arc<ManualClock>,
    session: Session,
    events: mpsc::Receiver<SessionEvent>,
}

fn harness() -> Harness {
    let bus = Arc::new(InMemoryBus::new());
    let store = Arc::new(InMemoryStore::new().with_feed(Arc::clone(&bus)));
    store.add_profile(Contact::new("alice", "Alice"));
    store.add_profile(Contact::new("bob", "Bob"));
    store.add_profile(Contact::new("carol", "Carol").with_online(true));
    store.add_friendship(&id("alice"), &id("bob"));
    store.add_friendship(&id("alice"), &id("carol"));

    let clock = Arc::new(ManualClock::new(1_000));
    let options = SessionOptions {
        poll_interval: Duration::from_secs(10),
        ..SessionOptions::default()
    }
    .with_clock(clock.clone());
    let (session, events) = ChatSession::new(id("alice"), Arc::clone(&store), Arc::clone(&bus), options);
    Harness {
        store,
        bus,
        clock,
        session,
        events,
    }
}

async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

fn count(events: &mut mpsc::Receiver<SessionEvent>, pred: impl Fn(&SessionEvent) -> bool) -> usize {
    let mut n = 0;
    while let Ok(event) = events.try_recv() {
        if pred(&event) {
            n += 1;
        }
    }
    n
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn initial_presence_comes_from_friend_list() {
    let h = harness();
    h.session.start().await;
    assert_eq!(h.session.is_online(&id("bob")), Some(false));
    assert_eq!(h.session.is_online(&id("carol")), Some(true));
    assert_eq!(h.session.is_online(&id("mallory")), None);
}

#[tokio::test]
async fn push_updates_only_the_matching_contact() {
    let h = harness();
    h.session.start().await;

    h.store.update_presence(&id("bob"), true);
    settle().await;

    assert_eq!(h.session.is_online(&id("bob")), Some(true));
    assert_eq!(h.session.is_online(&id("carol")), Some(true));
}

#[tokio::test(start_paused = true)]
async fn push_then_agreeing_poll_raises_no_notice() {
    let mut h = harness();
    h.session.start().await;
    h.session.open(&id("bob")).await;

    h.store.update_presence(&id("bob"), true);
    settle().await;
    assert_eq!(h.session.is_online(&id("bob")), Some(true));

    tokio::time::sleep(Duration::from_secs(10)).await;
    settle().await;

    assert_eq!(h.session.is_online(&id("bob")), Some(true));
    assert!(h.session.notices().is_empty());
    let raised = count(&mut h.events, |e| matches!(e, SessionEvent::NoticeRaised { .. }));
    assert_eq!(raised, 0);
}

#[tokio::test]
async fn notice_follows_presence_of_open_window() {
    let h = harness();
    h.session.start().await;
    h.session.open(&id("carol")).await;

    h.clock.set(42_000);
    h.store.update_presence(&id("carol"), false);
    settle().await;

    let notices = h.session.notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].contact, id("carol"));
    assert_eq!(notices[0].since, Timestamp::from_millis(42_000));

    h.store.update_presence(&id("carol"), true);
    settle().await;
    assert!(h.session.notices().is_empty());
}

#[tokio::test]
async fn no_notice_without_open_window() {
    let h = harness();
    h.session.start().await;

    h.store.update_presence(&id("carol"), false);
    settle().await;
    assert_eq!(h.session.is_online(&id("carol")), Some(false));
    assert!(h.session.notices().is_empty());
}

#[tokio::test]
async fn closing_window_clears_notice() {
    let h = harness();
    h.session.start().await;
    h.session.open(&id("carol")).await;
    h.store.update_presence(&id("carol"), false);
    settle().await;
    assert_eq!(h.session.notices().len(), 1);

    h.session.close(&id("carol"));
    assert!(h.session.notices().is_empty());
}

#[tokio::test(start_paused = true)]
async fn poll_recovers_missed_push() {
    let h = harness();
    h.session.start().await;

    h.store.update_presence_silently(&id("bob"), true);
    settle().await;
    assert_eq!(h.session.is_online(&id("bob")), Some(false));

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(h.session.is_online(&id("bob")), Some(true));
}

#[tokio::test(start_paused = true)]
async fn going_offline_stops_tracking() {
    let h = harness();
    h.session.start().await;
    assert!(h.session.is_tracking());

    h.session.set_presence(false).await;
    assert!(!h.session.is_tracking());
    assert_eq!(h.bus.subscriber_count(Topic::ProfileUpdated), 0);

    h.store.update_presence(&id("bob"), true);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.session.is_online(&id("bob")), Some(false));

    h.session.set_presence(true).await;
    assert_eq!(h.session.is_online(&id("bob")), Some(true));
}

#[tokio::test]
async fn own_presence_is_persisted_for_friends() {
    let h = harness();
    h.session.start().await;

    let bob_view = ChatSession::new(
        id("bob"),
        Arc::clone(&h.store),
        Arc::clone(&h.bus),
        SessionOptions::default(),
    )
    .0;
    bob_view.start().await;
    assert_eq!(bob_view.is_online(&id("alice")), Some(true));

    h.session.set_presence(false).await;
    settle().await;
    assert_eq!(bob_view.is_online(&id("alice")), Some(false));
}

#[tokio::test(start_paused = true)]
async fn shutdown_releases_every_subscription() {
    let h = harness();
    h.session.start().await;
    assert_eq!(h.bus.subscriber_count(Topic::ProfileUpdated), 1);
    assert_eq!(h.bus.subscriber_count(Topic::MessageInserted), 1);

    h.session.shutdown().await;
    assert_eq!(h.bus.subscriber_count(Topic::ProfileUpdated), 0);
    assert_eq!(h.bus.subscriber_count(Topic::MessageInserted), 0);
    assert!(!h.session.is_tracking());

    h.store.update_presence_silently(&id("bob"), true);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.session.is_online(&id("bob")), Some(false));
}

#[tokio::test(start_paused = true)]
async fn refused_subscription_falls_back_to_polling() {
    let h = harness();
    h.bus.set_rejecting(true);
    h.session.start().await;
    assert!(h.session.is_tracking());

    h.store.update_presence(&id("bob"), true);
    settle().await;
    assert_eq!(h.session.is_online(&id("bob")), Some(false));

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(h.session.is_online(&id("bob")), Some(true));
}
