//! Property-based tests for presence merging.
//!
//! Pushes and polls for the same contact may interleave in any order. The
//! final online flag must equal the value of the last processed update, and
//! a disconnect notice must be raised exactly once per online-to-offline
//! flip while the contact's window is open.

use std::sync::Arc;

use proptest::prelude::*;
use tokio::sync::mpsc;

use chatdock::chat::window::ChatWindowManager;
use chatdock::clock::SystemClock;
use chatdock::events::{EventSink, SessionEvent};
use chatdock::presence::{PresenceSource, PresenceTracker};
use chatdock::store::memory::InMemoryStore;
use chatdock_proto::contact::{Contact, ContactId, PresenceUpdate};

#[derive(Debug, Clone, Copy)]
enum Observation {
    Push(bool),
    Poll(bool),
}

impl Observation {
    const fn online(self) -> bool {
        match self {
            Self::Push(online) | Self::Poll(online) => online,
        }
    }
}

fn arb_observation() -> impl Strategy<Value = Observation> {
    prop_oneof![
        any::<bool>().prop_map(Observation::Push),
        any::<bool>().prop_map(Observation::Poll),
    ]
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap()
}

struct Run {
    final_online: Option<bool>,
    notice_present: bool,
    notices_raised: usize,
}

fn run(initial: bool, window_open: bool, observations: &[Observation]) -> Run {
    runtime().block_on(async {
        let me = ContactId::new("alice");
        let bob = ContactId::new("bob");
        let backend = Arc::new(InMemoryStore::new());
        backend.add_profile(Contact::new("alice", "Alice"));
        backend.add_profile(Contact::new("bob", "Bob").with_online(initial));
        backend.add_friendship(&me, &bob);

        let windows = ChatWindowManager::new(me.clone(), 4);
        if window_open {
            windows.open(&bob);
        }
        let (events, mut rx): (EventSink, mpsc::Receiver<SessionEvent>) = EventSink::channel(1024);
        let tracker = PresenceTracker::new(
            me,
            Arc::clone(&backend),
            windows.view(),
            events,
            Arc::new(SystemClock),
        );
        tracker.load().await.unwrap();

        for observation in observations {
            match *observation {
                Observation::Push(online) => {
                    tracker.apply(&PresenceUpdate::new("bob", online), PresenceSource::Push);
                }
                Observation::Poll(online) => {
                    backend.update_presence_silently(&bob, online);
                    tracker.poll_once().await;
                }
            }
        }

        let mut notices_raised = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, SessionEvent::NoticeRaised { .. }) {
                notices_raised += 1;
            }
        }
        Run {
            final_online: tracker.is_online(&bob),
            notice_present: tracker.notice(&bob).is_some(),
            notices_raised,
        }
    })
}

proptest! {
    #[test]
    fn last_processed_update_wins(
        initial in any::<bool>(),
        observations in prop::collection::vec(arb_observation(), 1..24),
    ) {
        let outcome = run(initial, false, &observations);
        let last = observations.last().map(|o| o.online());
        prop_assert_eq!(outcome.final_online, last);
        prop_assert!(!outcome.notice_present);
        prop_assert_eq!(outcome.notices_raised, 0);
    }

    #[test]
    fn one_notice_per_disconnect_while_window_open(
        initial in any::<bool>(),
        observations in prop::collection::vec(arb_observation(), 0..24),
    ) {
        let outcome = run(initial, true, &observations);

        let mut online = initial;
        let mut disconnects = 0;
        for observation in &observations {
            if online && !observation.online() {
                disconnects += 1;
            }
            online = observation.online();
        }

        prop_assert_eq!(outcome.final_online, Some(online));
        prop_assert_eq!(outcome.notices_raised, disconnects);
        prop_assert_eq!(outcome.notice_present, !online && disconnects > 0);
    }
}
