//! Per-sender unread counters.
//!
//! Counts always come from the store: an incoming message triggers a
//! reload rather than a local increment, so the badge cannot drift from the
//! persisted read state. Marking a conversation read zeroes its badge
//! immediately and restores the previous count if the store write fails.
//!
//! A reload and a read-mark can overlap. Reload results for a contact whose
//! read-mark is in flight, or finished after the reload's query started,
//! are ignored for that contact so a stale count never overwrites a
//! successful mark.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use chatdock_proto::contact::ContactId;
use chatdock_proto::message::Message;

use crate::chat::window::WindowState;
use crate::events::{EventSink, SessionEvent};
use crate::store::{PersistentStore, StoreError};

#[derive(Debug, Default)]
struct UnreadState {
    counts: HashMap<ContactId, u32>,
    /// Read-marks in flight, per contact.
    marking: HashMap<ContactId, usize>,
    /// Generation at which each contact's last read-mark succeeded.
    marked_at: HashMap<ContactId, u64>,
    /// Bumped whenever a read-mark starts or finishes.
    generation: u64,
}

impl UnreadState {
    /// Whether reload results that were queried at `started` must not
    /// touch `contact`.
    fn holds(&self, contact: &ContactId, started: u64) -> bool {
        self.marking.contains_key(contact)
            || self.marked_at.get(contact).is_some_and(|at| *at > started)
    }

    fn finish_mark(&mut self, contact: &ContactId, succeeded: bool) {
        self.generation += 1;
        if let Some(n) = self.marking.get_mut(contact) {
            *n -= 1;
            if *n == 0 {
                self.marking.remove(contact);
            }
        }
        if succeeded {
            self.marked_at.insert(contact.clone(), self.generation);
        }
    }
}

/// Unread message counts addressed to the current user, by sender.
pub struct UnreadCounter<S> {
    me: ContactId,
    store: Arc<S>,
    state: Mutex<UnreadState>,
    events: EventSink,
}

impl<S: PersistentStore> UnreadCounter<S> {
    /// Creates an empty counter for `me`.
    pub fn new(me: ContactId, store: Arc<S>, events: EventSink) -> Self {
        Self {
            me,
            store,
            state: Mutex::new(UnreadState::default()),
            events,
        }
    }

    /// Replaces every count with the store's current values.
    ///
    /// Failures are logged and the last known counts are kept. Returns
    /// whether the reload succeeded.
    pub async fn reload(&self) -> bool {
        let started = self.state.lock().generation;
        let rows = match self.store.query_unread_counts(&self.me).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(error = %e, "unread count reload failed");
                return false;
            }
        };

        let mut changed: Vec<(ContactId, u32)> = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let mut fresh: HashMap<ContactId, u32> = rows
                .into_iter()
                .filter(|row| row.count > 0 && !state.holds(&row.sender, started))
                .map(|row| (row.sender, row.count))
                .collect();
            fresh.extend(
                state
                    .counts
                    .iter()
                    .filter(|(sender, _)| state.holds(sender, started))
                    .map(|(sender, count)| (sender.clone(), *count)),
            );
            let counts = &mut state.counts;
            let previous = std::mem::replace(counts, fresh);
            let mut changed: Vec<(ContactId, u32)> = counts
                .iter()
                .filter(|(sender, count)| previous.get(*sender) != Some(*count))
                .map(|(sender, count)| (sender.clone(), *count))
                .collect();
            changed.extend(
                previous
                    .into_keys()
                    .filter(|sender| !counts.contains_key(sender))
                    .map(|sender| (sender, 0)),
            );
            changed
        };
        changed.sort();

        tracing::debug!(changed = changed.len(), "unread counts reloaded");
        for (contact, count) in changed {
            self.events.emit(SessionEvent::UnreadChanged { contact, count });
        }
        true
    }

    /// Reacts to a "message inserted" event.
    ///
    /// Reloads when the message is addressed to the current user and the
    /// sender's window is closed or minimized. Returns whether a reload was
    /// attempted.
    pub async fn on_message_inserted(&self, message: &Message, window: Option<WindowState>) -> bool {
        if message.receiver != self.me || message.sender == self.me {
            return false;
        }
        if window == Some(WindowState::Expanded) {
            return false;
        }
        self.reload().await;
        true
    }

    /// Marks every message from `contact` as read.
    ///
    /// The badge is zeroed before the store write. If the write fails, the
    /// previous count is put back unless the entry was set again in the
    /// meantime. On success the badge is zero whatever reloads ran during
    /// the write.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store write fails.
    pub async fn mark_read(&self, contact: &ContactId) -> Result<(), StoreError> {
        let previous = {
            let mut state = self.state.lock();
            state.generation += 1;
            *state.marking.entry(contact.clone()).or_default() += 1;
            state.counts.remove(contact)
        };
        if previous.is_some() {
            self.emit(contact, 0);
        }

        let result = self.store.mark_read(&self.me, contact).await;
        let mut state = self.state.lock();
        state.finish_mark(contact, result.is_ok());
        match result {
            Ok(()) => {
                let cleared = state.counts.remove(contact).is_some();
                drop(state);
                if cleared {
                    self.emit(contact, 0);
                }
                tracing::debug!(%contact, "conversation marked read");
                Ok(())
            }
            Err(e) => {
                let restored = match previous {
                    Some(count) if !state.counts.contains_key(contact) => {
                        state.counts.insert(contact.clone(), count);
                        Some(count)
                    }
                    _ => None,
                };
                drop(state);
                tracing::warn!(%contact, error = %e, "mark read failed");
                if let Some(count) = restored {
                    self.emit(contact, count);
                }
                Err(e)
            }
        }
    }

    /// Unread count for one sender.
    #[must_use]
    pub fn count(&self, contact: &ContactId) -> u32 {
        self.state.lock().counts.get(contact).copied().unwrap_or(0)
    }

    /// All non-zero counts, sorted by sender.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(ContactId, u32)> {
        let mut counts: Vec<(ContactId, u32)> = self
            .state
            .lock()
            .counts
            .iter()
            .map(|(sender, count)| (sender.clone(), *count))
            .collect();
        counts.sort();
        counts
    }

    /// Sum of all counts, for a global badge.
    #[must_use]
    pub fn total(&self) -> u32 {
        self.state.lock().counts.values().copied().fold(0, u32::saturating_add)
    }

    fn emit(&self, contact: &ContactId, count: u32) {
        self.events.emit(SessionEvent::UnreadChanged {
            contact: contact.clone(),
            count,
        });
    }
}
