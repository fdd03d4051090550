//! Contact identity and presence types.

use serde::{Deserialize, Serialize};

/// Identity of a user profile (the current user or one of their friends).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContactId(String);

impl ContactId {
    /// Creates a contact identifier from its string form.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the string form of this identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ContactId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl std::fmt::Display for ContactId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A friend of the current user as shown in the contact list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    /// Profile identity.
    pub id: ContactId,
    /// Name shown in the contact list and chat window header.
    pub display_name: String,
    /// Avatar image reference, if the profile has one.
    pub avatar: Option<String>,
    /// Whether the contact is currently online.
    pub online: bool,
}

impl Contact {
    /// Creates an offline contact without an avatar.
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: ContactId::new(id),
            display_name: display_name.into(),
            avatar: None,
            online: false,
        }
    }

    /// Sets the initial online flag.
    #[must_use]
    pub fn with_online(mut self, online: bool) -> Self {
        self.online = online;
        self
    }

    /// Sets the avatar reference.
    #[must_use]
    pub fn with_avatar(mut self, avatar: impl Into<String>) -> Self {
        self.avatar = Some(avatar.into());
        self
    }
}

/// The online flag of one profile, as reported by a presence query or a
/// "profile updated" change event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceUpdate {
    /// The profile whose presence was observed.
    pub id: ContactId,
    /// Observed online flag.
    pub online: bool,
}

impl PresenceUpdate {
    /// Creates a presence observation.
    pub fn new(id: impl Into<ContactId>, online: bool) -> Self {
        Self {
            id: id.into(),
            online,
        }
    }
}
