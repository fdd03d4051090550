//! Contact presence tracking.
//!
//! [`PresenceTracker`] is the only writer of `Contact::online`. Two
//! producers feed it: "profile updated" pushes from the change feed and a
//! periodic poll of the store that corrects for missed pushes. Both write
//! into the same map keyed by contact id, so the last update processed
//! wins regardless of which producer delivered it.
//!
//! When a contact with an open chat window goes offline, a
//! [`DisconnectNotice`] is raised; it is cleared when they come back or
//! their window closes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::MissedTickBehavior;

use chatdock_proto::contact::{Contact, ContactId, PresenceUpdate};
use chatdock_proto::event::{ChangeEvent, Topic};
use chatdock_proto::message::Timestamp;

use crate::bus::{ChangeHandler, EventBus};
use crate::chat::window::WindowsView;
use crate::clock::Clock;
use crate::events::{EventSink, SessionEvent};
use crate::scope::TaskScope;
use crate::store::{PersistentStore, StoreError};

/// Default interval of the fallback presence poll.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Where a presence value came from. Only used for logging; every source
/// is merged the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceSource {
    /// Bulk load of the friend list.
    Snapshot,
    /// A "profile updated" push.
    Push,
    /// The fallback poll.
    Poll,
}

/// Banner shown in a contact's open chat window after they went offline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectNotice {
    /// The contact that went offline.
    pub contact: ContactId,
    /// When the disconnect was observed.
    pub since: Timestamp,
}

/// A flip of one contact's online flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceChange {
    /// The contact whose flag flipped.
    pub contact: ContactId,
    /// New online flag.
    pub online: bool,
    /// Whether a disconnect notice was raised or cleared by this flip.
    pub notice: Option<NoticeChange>,
}

/// Effect of a presence flip on the contact's disconnect notice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoticeChange {
    /// A notice was raised at this time.
    Raised(Timestamp),
    /// The existing notice was cleared.
    Cleared,
}

#[derive(Debug, Default)]
struct PresenceState {
    contacts: HashMap<ContactId, Contact>,
    order: Vec<ContactId>,
    notices: HashMap<ContactId, DisconnectNotice>,
}

impl PresenceState {
    /// Writes one observed value. Returns the change if the flag flipped.
    ///
    /// Must be called with the presence lock held: the window check happens
    /// here so a concurrent close either prevents the notice or clears it
    /// once the lock is released.
    fn record(
        &mut self,
        id: &ContactId,
        online: bool,
        windows: &WindowsView,
        now: Timestamp,
    ) -> Option<PresenceChange> {
        let contact = self.contacts.get_mut(id)?;
        if contact.online == online {
            return None;
        }
        contact.online = online;

        let notice = if online {
            self.notices.remove(id).map(|_| NoticeChange::Cleared)
        } else if windows.is_open(id) {
            self.notices.insert(
                id.clone(),
                DisconnectNotice {
                    contact: id.clone(),
                    since: now,
                },
            );
            Some(NoticeChange::Raised(now))
        } else {
            None
        };

        Some(PresenceChange {
            contact: id.clone(),
            online,
            notice,
        })
    }
}

/// Single source of truth for the online flag of each contact.
///
/// Notice events are emitted with the presence lock held so they reach the
/// event channel in the order the notices changed. The presence lock is
/// taken before the windows lock, never after.
pub struct PresenceTracker<S> {
    me: ContactId,
    store: Arc<S>,
    state: Mutex<PresenceState>,
    windows: WindowsView,
    events: EventSink,
    clock: Arc<dyn Clock>,
}

impl<S: PersistentStore> PresenceTracker<S> {
    /// Creates an empty tracker for `me`'s friend list.
    pub fn new(
        me: ContactId,
        store: Arc<S>,
        windows: WindowsView,
        events: EventSink,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            me,
            store,
            state: Mutex::new(PresenceState::default()),
            windows,
            events,
            clock,
        }
    }

    /// Loads the friend list with presence from the store.
    ///
    /// Contacts already known keep their notices; flips relative to the
    /// previous state are reported like any other update.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails; the current contact list
    /// is kept.
    pub async fn load(&self) -> Result<usize, StoreError> {
        let friends = self.store.query_friends_with_presence(&self.me).await?;
        let now = self.clock.now();
        let count = friends.len();

        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let mut previous = std::mem::take(&mut state.contacts);
            state.order = friends.iter().map(|c| c.id.clone()).collect();

            let mut observed = Vec::with_capacity(count);
            for friend in friends {
                let id = friend.id.clone();
                let online = friend.online;
                // Known contacts keep their old flag here so the fresh one
                // goes through `record` and updates notices.
                let known = previous.remove(&id).map(|c| c.online);
                state.contacts.insert(
                    id.clone(),
                    Contact {
                        online: known.unwrap_or(online),
                        ..friend
                    },
                );
                observed.push((id, online));
            }
            state.notices.retain(|id, _| state.contacts.contains_key(id));

            let changes: Vec<PresenceChange> = observed
                .into_iter()
                .filter_map(|(id, online)| state.record(&id, online, &self.windows, now))
                .collect();

            tracing::info!(count, "contacts loaded");
            self.events.emit(SessionEvent::ContactsLoaded { count });
            for change in changes {
                self.report(change, PresenceSource::Snapshot);
            }
        }
        Ok(count)
    }

    /// Merges one observed presence value.
    ///
    /// Updates for ids outside the contact list are ignored. Returns the
    /// change if the contact's flag flipped.
    pub fn apply(&self, update: &PresenceUpdate, source: PresenceSource) -> Option<PresenceChange> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        let change = state.record(&update.id, update.online, &self.windows, now);
        match &change {
            Some(change) => self.report(change.clone(), source),
            None => tracing::trace!(contact = %update.id, ?source, "presence unchanged or unknown"),
        }
        drop(state);
        change
    }

    /// Re-queries presence for every tracked contact and merges the result.
    ///
    /// Failures are logged and swallowed; the next tick retries. Returns
    /// the number of contacts whose flag flipped.
    pub async fn poll_once(&self) -> usize {
        let ids = self.state.lock().order.clone();
        if ids.is_empty() {
            return 0;
        }
        match self.store.query_presence(&ids).await {
            Ok(updates) => updates
                .iter()
                .filter_map(|update| self.apply(update, PresenceSource::Poll))
                .count(),
            Err(e) => {
                tracing::warn!(error = %e, "presence poll failed");
                0
            }
        }
    }

    /// Removes the contact's disconnect notice. Returns `false` if there
    /// was none.
    pub fn clear_notice(&self, contact: &ContactId) -> bool {
        let mut state = self.state.lock();
        let cleared = state.notices.remove(contact).is_some();
        if cleared {
            self.events.emit(SessionEvent::NoticeCleared {
                contact: contact.clone(),
            });
        }
        drop(state);
        cleared
    }

    /// Contacts in friend-list order.
    #[must_use]
    pub fn contacts(&self) -> Vec<Contact> {
        let state = self.state.lock();
        state
            .order
            .iter()
            .filter_map(|id| state.contacts.get(id).cloned())
            .collect()
    }

    /// One contact's online flag, or `None` if it is not tracked.
    #[must_use]
    pub fn is_online(&self, contact: &ContactId) -> Option<bool> {
        self.state.lock().contacts.get(contact).map(|c| c.online)
    }

    /// Active disconnect notices in friend-list order.
    #[must_use]
    pub fn notices(&self) -> Vec<DisconnectNotice> {
        let state = self.state.lock();
        state
            .order
            .iter()
            .filter_map(|id| state.notices.get(id).cloned())
            .collect()
    }

    /// The contact's disconnect notice, if any.
    #[must_use]
    pub fn notice(&self, contact: &ContactId) -> Option<DisconnectNotice> {
        self.state.lock().notices.get(contact).cloned()
    }

    fn report(&self, change: PresenceChange, source: PresenceSource) {
        tracing::debug!(contact = %change.contact, online = change.online, ?source, "presence changed");
        self.events.emit(SessionEvent::PresenceChanged {
            contact: change.contact.clone(),
            online: change.online,
        });
        match change.notice {
            Some(NoticeChange::Raised(since)) => self.events.emit(SessionEvent::NoticeRaised {
                contact: change.contact,
                since,
            }),
            Some(NoticeChange::Cleared) => self.events.emit(SessionEvent::NoticeCleared {
                contact: change.contact,
            }),
            None => {}
        }
    }
}

impl<S: PersistentStore + 'static> PresenceTracker<S> {
    /// Starts push and poll tracking.
    ///
    /// The returned scope owns the "profile updated" subscription and the
    /// poll timer; releasing or dropping it stops both. If the bus refuses
    /// the subscription, the poll alone keeps presence fresh.
    pub async fn activate<B: EventBus>(self: &Arc<Self>, bus: &B, poll_interval: Duration) -> TaskScope {
        let mut scope = TaskScope::new("presence");
        if let Err(e) = scope.listen(bus, Topic::ProfileUpdated, Arc::clone(self)).await {
            tracing::warn!(error = %e, "presence subscription failed, relying on polling");
        }

        let tracker = Arc::clone(self);
        let period = poll_interval.max(Duration::from_millis(1));
        scope.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; the caller has just loaded.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                tracker.poll_once().await;
            }
        });
        scope
    }
}

impl<S: PersistentStore + 'static> ChangeHandler for PresenceTracker<S> {
    async fn on_change(&self, event: ChangeEvent) {
        match event {
            ChangeEvent::ProfileUpdated(update) => {
                self.apply(&update, PresenceSource::Push);
            }
            ChangeEvent::MessageInserted(_) => {}
        }
    }
}
