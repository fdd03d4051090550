//! Persistent store collaborator.
//!
//! Defines the [`PersistentStore`] trait the subsystem reads and writes
//! through: message rows, read state, and friend/presence queries. The
//! hosted service is one implementation; [`memory::InMemoryStore`] is the
//! in-process one used by tests and the demo binary.

pub mod memory;

use chatdock_proto::contact::{Contact, ContactId, PresenceUpdate};
use chatdock_proto::key::ConversationKey;
use chatdock_proto::message::Message;

/// Errors that can occur during store operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A write operation failed.
    #[error("write failed: {0}")]
    WriteFailed(String),

    /// A read operation failed.
    #[error("read failed: {0}")]
    ReadFailed(String),

    /// The requested item was not found.
    #[error("not found: {0}")]
    NotFound(String),
}

/// Number of unread messages from one sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnreadCount {
    /// The sender of the unread messages.
    pub sender: ContactId,
    /// How many of their messages are unread.
    pub count: u32,
}

/// Async access to the persisted messaging and profile data.
///
/// Implementations include:
/// - [`memory::InMemoryStore`]: in-process store for tests and demos
/// - the hosted data service, reached over its client library
pub trait PersistentStore: Send + Sync {
    /// Messages of one conversation, ordered by creation time ascending.
    fn query_messages(
        &self,
        key: &ConversationKey,
    ) -> impl std::future::Future<Output = Result<Vec<Message>, StoreError>> + Send;

    /// Persist a new message and return the stored row with its real id.
    fn insert_message(
        &self,
        key: &ConversationKey,
        sender: &ContactId,
        receiver: &ContactId,
        content: &str,
    ) -> impl std::future::Future<Output = Result<Message, StoreError>> + Send;

    /// Mark every unread message from `sender` to `receiver` as read.
    fn mark_read(
        &self,
        receiver: &ContactId,
        sender: &ContactId,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Unread counts addressed to `receiver`, grouped by sender.
    fn query_unread_counts(
        &self,
        receiver: &ContactId,
    ) -> impl std::future::Future<Output = Result<Vec<UnreadCount>, StoreError>> + Send;

    /// Friends of `user`, including their current online flag.
    fn query_friends_with_presence(
        &self,
        user: &ContactId,
    ) -> impl std::future::Future<Output = Result<Vec<Contact>, StoreError>> + Send;

    /// Current online flag of each requested profile.
    fn query_presence(
        &self,
        ids: &[ContactId],
    ) -> impl std::future::Future<Output = Result<Vec<PresenceUpdate>, StoreError>> + Send;

    /// Persist the online flag of `user`'s own profile.
    fn set_presence(
        &self,
        user: &ContactId,
        online: bool,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;
}
