//! Change notifications emitted to the UI layer.
//!
//! Every component that owns a piece of session state reports its
//! mutations as [`SessionEvent`]s through a shared [`EventSink`]. The UI
//! re-reads the affected projection when an event arrives.

use tokio::sync::mpsc;

use chatdock_proto::contact::ContactId;
use chatdock_proto::message::{MessageId, PersistedId, TempId, Timestamp};

use crate::chat::window::WindowState;

/// A state change the UI should react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The contact list was (re)loaded from the store.
    ContactsLoaded {
        /// Number of contacts now tracked.
        count: usize,
    },
    /// A contact's online flag flipped.
    PresenceChanged {
        /// The contact whose presence changed.
        contact: ContactId,
        /// New online flag.
        online: bool,
    },
    /// A contact with an open chat window went offline.
    NoticeRaised {
        /// The contact that disconnected.
        contact: ContactId,
        /// When the disconnect was observed.
        since: Timestamp,
    },
    /// A disconnect notice was cleared (contact back online or window closed).
    NoticeCleared {
        /// The contact whose notice was cleared.
        contact: ContactId,
    },
    /// Presence tracking was switched on or off.
    TrackingChanged {
        /// Whether tracking is now active.
        active: bool,
    },
    /// The unread count for a sender changed.
    UnreadChanged {
        /// The sender whose badge changed.
        contact: ContactId,
        /// New unread count.
        count: u32,
    },
    /// A chat window was opened.
    WindowOpened {
        /// The contact the window belongs to.
        contact: ContactId,
    },
    /// A chat window was minimized or restored.
    WindowStateChanged {
        /// The contact the window belongs to.
        contact: ContactId,
        /// New window state.
        state: WindowState,
    },
    /// A chat window was closed.
    WindowClosed {
        /// The contact the window belonged to.
        contact: ContactId,
    },
    /// A message was added to an open conversation.
    MessageAppended {
        /// The contact on the other side of the conversation.
        contact: ContactId,
        /// Identity of the appended message.
        message_id: MessageId,
    },
    /// An optimistic message was confirmed by the store.
    MessageConfirmed {
        /// The contact on the other side of the conversation.
        contact: ContactId,
        /// Temporary id the message was shown under.
        temp_id: TempId,
        /// Id assigned by the store.
        id: PersistedId,
    },
    /// A send failed; the optimistic message was removed and the draft restored.
    SendFailed {
        /// The contact the message was addressed to.
        contact: ContactId,
        /// The text that was put back into the draft buffer.
        draft: String,
        /// Description of the failure.
        reason: String,
    },
    /// An audible alert should be played for an incoming message.
    Alert {
        /// The sender of the message.
        from: ContactId,
    },
}

/// Best-effort sender half for [`SessionEvent`]s.
///
/// Events are dropped when the channel is full or the receiver is gone;
/// projections stay authoritative, so a missed event only delays a redraw.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<SessionEvent>,
}

impl EventSink {
    /// Creates a sink and the receiver the UI should drain.
    #[must_use]
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, rx)
    }

    /// Emits an event without waiting.
    pub fn emit(&self, event: SessionEvent) {
        if let Err(mpsc::error::TrySendError::Full(event)) = self.tx.try_send(event) {
            tracing::debug!(?event, "session event channel full, dropping event");
        }
    }
}
