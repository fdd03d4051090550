//! Chat layer: open windows, conversation history and the send pipeline.
//!
//! [`window::ChatWindowManager`] owns which chats are open, and
//! [`conversation::ConversationStore`] holds their message lists.
//! [`send::MessageSender`] runs the optimistic send protocol on top of both.

pub mod conversation;
pub mod send;
pub mod window;

use chatdock_proto::contact::ContactId;
use chatdock_proto::message::ValidationError;

use crate::store::StoreError;

/// Errors that can occur when sending a message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// The text is empty or too long.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// There is no open chat window for the contact.
    #[error("no open chat window for {0}")]
    NoWindow(ContactId),

    /// The store rejected the write.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
