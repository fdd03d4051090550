//! Canonical identifiers for two-party conversations.

use serde::{Deserialize, Serialize};

use crate::contact::ContactId;

/// Order-independent identifier for the message thread between two
/// participants.
///
/// The two identities are sorted before being joined, so
/// `between(a, b) == between(b, a)`. The shorter-sorting identity is
/// length-prefixed (`"<len>:<low>:<high>"`), which keeps the encoding
/// injective even when identities themselves contain `:`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConversationKey(String);

impl ConversationKey {
    /// Derives the key for the conversation between `a` and `b`.
    #[must_use]
    pub fn between(a: &ContactId, b: &ContactId) -> Self {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        Self(format!("{}:{}:{}", low.as_str().len(), low, high))
    }

    /// Returns the string form used to address persisted rows and
    /// realtime filters.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
