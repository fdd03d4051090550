//! Optimistic send pipeline.
//!
//! A send runs in two phases. [`MessageSender::begin`] validates the text
//! and appends a pending message to the open conversation synchronously,
//! so the UI shows it before any I/O. [`MessageSender::dispatch`] then
//! writes it to the store and either confirms the pending entry with the
//! stored row or removes it and puts the text back into the draft.

use std::sync::Arc;

use chatdock_proto::contact::ContactId;
use chatdock_proto::key::ConversationKey;
use chatdock_proto::message::{self, Message, MessageId, TempId};

use super::SendError;
use super::conversation::{ConversationStore, MessageAction, Reduced};
use super::window::ChatWindowManager;
use crate::clock::Clock;
use crate::events::{EventSink, SessionEvent};
use crate::store::PersistentStore;

/// A message that has been appended locally but not yet written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSend {
    /// The addressee.
    pub contact: ContactId,
    /// Conversation the message was appended to.
    pub conversation: ConversationKey,
    /// Temporary id of the pending entry.
    pub temp_id: TempId,
    /// Text as submitted.
    pub content: String,
}

/// Runs the optimistic send protocol for the current user.
pub struct MessageSender<S> {
    me: ContactId,
    store: Arc<S>,
    conversations: Arc<ConversationStore<S>>,
    windows: ChatWindowManager,
    events: EventSink,
    clock: Arc<dyn Clock>,
    max_len: usize,
}

impl<S: PersistentStore> MessageSender<S> {
    /// Creates a sender for `me`.
    pub fn new(
        me: ContactId,
        store: Arc<S>,
        conversations: Arc<ConversationStore<S>>,
        windows: ChatWindowManager,
        events: EventSink,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            me,
            store,
            conversations,
            windows,
            events,
            clock,
            max_len: message::DEFAULT_MAX_MESSAGE_LEN,
        }
    }

    /// Sets the maximum message length in characters.
    #[must_use]
    pub const fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len;
        self
    }

    /// Validates `text` and appends it as a pending message.
    ///
    /// Clears the window's draft. Performs no I/O.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Validation`] for blank or oversized text and
    /// [`SendError::NoWindow`] if the contact has no open window. The
    /// draft is left untouched in both cases.
    pub fn begin(&self, contact: &ContactId, text: &str) -> Result<PendingSend, SendError> {
        message::validate_content(text, self.max_len)?;
        let window = self
            .windows
            .window(contact)
            .ok_or_else(|| SendError::NoWindow(contact.clone()))?;

        let temp_id = TempId::new();
        let pending = Message {
            id: MessageId::Pending(temp_id.clone()),
            ..Message::pending(
                self.me.clone(),
                contact.clone(),
                text.to_string(),
                self.clock.now(),
            )
        };
        let message_id = pending.id.clone();
        self.conversations
            .apply(&window.conversation, MessageAction::Append(pending));
        self.windows.take_draft(contact);

        tracing::debug!(%contact, %temp_id, "pending message appended");
        self.events.emit(SessionEvent::MessageAppended {
            contact: contact.clone(),
            message_id,
        });

        Ok(PendingSend {
            contact: contact.clone(),
            conversation: window.conversation,
            temp_id,
            content: text.to_string(),
        })
    }

    /// Writes a pending message to the store and reconciles the result.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Store`] if the write fails. By then the pending
    /// entry has been removed and the text restored to the draft.
    pub async fn dispatch(&self, pending: PendingSend) -> Result<Message, SendError> {
        let result = self
            .store
            .insert_message(&pending.conversation, &self.me, &pending.contact, &pending.content)
            .await;

        match result {
            Ok(stored) => {
                let outcome = self.conversations.apply(
                    &pending.conversation,
                    MessageAction::Confirm {
                        temp_id: pending.temp_id.clone(),
                        message: stored.clone(),
                    },
                );
                if let MessageId::Confirmed(id) = &stored.id {
                    tracing::debug!(
                        contact = %pending.contact,
                        temp_id = %pending.temp_id,
                        id = %id,
                        ?outcome,
                        "message confirmed"
                    );
                    if matches!(outcome, Some(Reduced::Confirmed | Reduced::Merged)) {
                        self.events.emit(SessionEvent::MessageConfirmed {
                            contact: pending.contact.clone(),
                            temp_id: pending.temp_id,
                            id: id.clone(),
                        });
                    }
                }
                Ok(stored)
            }
            Err(e) => {
                tracing::warn!(contact = %pending.contact, error = %e, "send failed, rolling back");
                self.conversations.apply(
                    &pending.conversation,
                    MessageAction::Reject {
                        temp_id: pending.temp_id,
                    },
                );
                self.windows.restore_draft(&pending.contact, &pending.content);
                self.events.emit(SessionEvent::SendFailed {
                    contact: pending.contact,
                    draft: pending.content,
                    reason: e.to_string(),
                });
                Err(SendError::Store(e))
            }
        }
    }

    /// Appends and writes a message in one call.
    ///
    /// # Errors
    ///
    /// See [`begin`](Self::begin) and [`dispatch`](Self::dispatch).
    pub async fn send(&self, contact: &ContactId, text: &str) -> Result<Message, SendError> {
        let pending = self.begin(contact, text)?;
        self.dispatch(pending).await
    }
}
