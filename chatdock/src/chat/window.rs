//! Chat window lifecycle and screen ordering.
//!
//! [`ChatWindowManager`] owns the set of open windows. Each contact has at
//! most one window, which moves through `closed -> expanded <-> minimized ->
//! closed`. Windows are laid out left to right in the order they were
//! opened; a window's slot is its index in that order.

use std::sync::Arc;

use parking_lot::Mutex;

use chatdock_proto::contact::ContactId;
use chatdock_proto::key::ConversationKey;

/// Default maximum number of simultaneously open chat windows.
pub const DEFAULT_MAX_OPEN_WINDOWS: usize = 4;

/// Visual state of an open chat window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowState {
    /// Full window with message list and input box.
    Expanded,
    /// Collapsed to its title bar.
    Minimized,
}

impl std::fmt::Display for WindowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Expanded => write!(f, "expanded"),
            Self::Minimized => write!(f, "minimized"),
        }
    }
}

/// One open chat window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatWindow {
    /// The contact this window chats with.
    pub contact: ContactId,
    /// Conversation shown in the window.
    pub conversation: ConversationKey,
    /// Expanded or minimized.
    pub state: WindowState,
    /// Text typed into the input box but not yet sent.
    pub draft: String,
    /// Screen position, 0 being the first window.
    pub slot: usize,
}

/// Result of [`ChatWindowManager::open`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenOutcome {
    /// A new window was created.
    Opened {
        /// Screen slot assigned to the window.
        slot: usize,
        /// Window closed to stay within the window limit, if any.
        evicted: Option<ChatWindow>,
    },
    /// The contact already had a window; nothing changed.
    AlreadyOpen,
}

#[derive(Debug)]
struct WindowsState {
    windows: Vec<ChatWindow>,
    max_open: usize,
}

impl WindowsState {
    fn position(&self, contact: &ContactId) -> Option<usize> {
        self.windows.iter().position(|w| w.contact == *contact)
    }

    fn get_mut(&mut self, contact: &ContactId) -> Option<&mut ChatWindow> {
        self.windows.iter_mut().find(|w| w.contact == *contact)
    }

    fn remove(&mut self, index: usize) -> ChatWindow {
        let window = self.windows.remove(index);
        for (slot, w) in self.windows.iter_mut().enumerate() {
            w.slot = slot;
        }
        window
    }
}

/// Owner of the open-window set.
///
/// Cloning yields another handle to the same windows. Other components get
/// read-only access through [`WindowsView`].
#[derive(Debug, Clone)]
pub struct ChatWindowManager {
    me: ContactId,
    state: Arc<Mutex<WindowsState>>,
}

impl ChatWindowManager {
    /// Creates a manager for `me` allowing at most `max_open` windows.
    #[must_use]
    pub fn new(me: ContactId, max_open: usize) -> Self {
        Self {
            me,
            state: Arc::new(Mutex::new(WindowsState {
                windows: Vec::new(),
                max_open: max_open.max(1),
            })),
        }
    }

    /// Returns a read-only view of the window set.
    #[must_use]
    pub fn view(&self) -> WindowsView {
        WindowsView {
            state: Arc::clone(&self.state),
        }
    }

    /// Opens an expanded window for `contact`.
    ///
    /// Idempotent: if the contact already has a window, returns
    /// [`OpenOutcome::AlreadyOpen`] and leaves it untouched. When the
    /// window limit is reached, the earliest opened window is evicted.
    pub fn open(&self, contact: &ContactId) -> OpenOutcome {
        let mut state = self.state.lock();
        if state.position(contact).is_some() {
            return OpenOutcome::AlreadyOpen;
        }

        let evicted = if state.windows.len() >= state.max_open {
            Some(state.remove(0))
        } else {
            None
        };

        let slot = state.windows.len();
        state.windows.push(ChatWindow {
            contact: contact.clone(),
            conversation: ConversationKey::between(&self.me, contact),
            state: WindowState::Expanded,
            draft: String::new(),
            slot,
        });
        drop(state);

        if let Some(window) = &evicted {
            tracing::debug!(contact = %window.contact, "window evicted to make room");
        }
        tracing::debug!(%contact, slot, "window opened");
        OpenOutcome::Opened { slot, evicted }
    }

    /// Collapses the window. Returns `false` if there is no window or it
    /// is already minimized.
    pub fn minimize(&self, contact: &ContactId) -> bool {
        self.set_state(contact, WindowState::Minimized)
    }

    /// Expands a minimized window. Returns `false` if there is no window
    /// or it is already expanded.
    pub fn restore(&self, contact: &ContactId) -> bool {
        self.set_state(contact, WindowState::Expanded)
    }

    /// Removes the window, returning it if it existed.
    pub fn close(&self, contact: &ContactId) -> Option<ChatWindow> {
        let mut state = self.state.lock();
        let index = state.position(contact)?;
        let window = state.remove(index);
        drop(state);
        tracing::debug!(%contact, "window closed");
        Some(window)
    }

    /// Replaces the draft text. Returns `false` if there is no window.
    pub fn set_draft(&self, contact: &ContactId, text: &str) -> bool {
        self.state.lock().get_mut(contact).is_some_and(|w| {
            text.clone_into(&mut w.draft);
            true
        })
    }

    /// Clears the draft and returns what it held.
    pub fn take_draft(&self, contact: &ContactId) -> Option<String> {
        self.state
            .lock()
            .get_mut(contact)
            .map(|w| std::mem::take(&mut w.draft))
    }

    /// Puts the text of a failed send back into the draft buffer.
    ///
    /// If the user typed something new in the meantime, the restored text
    /// goes first, separated by a newline. Returns `false` if the window
    /// was closed.
    pub fn restore_draft(&self, contact: &ContactId, text: &str) -> bool {
        let mut state = self.state.lock();
        let Some(window) = state.get_mut(contact) else {
            return false;
        };
        window.draft = if window.draft.is_empty() {
            text.to_string()
        } else {
            format!("{text}\n{}", window.draft)
        };
        true
    }

    /// Snapshot of all open windows in slot order.
    #[must_use]
    pub fn windows(&self) -> Vec<ChatWindow> {
        self.state.lock().windows.clone()
    }

    /// Snapshot of one window.
    #[must_use]
    pub fn window(&self, contact: &ContactId) -> Option<ChatWindow> {
        self.view().window(contact)
    }

    fn set_state(&self, contact: &ContactId, target: WindowState) -> bool {
        let mut state = self.state.lock();
        match state.get_mut(contact) {
            Some(window) if window.state != target => {
                window.state = target;
                drop(state);
                tracing::debug!(%contact, state = %target, "window state changed");
                true
            }
            _ => false,
        }
    }
}

/// Read-only access to the open-window set.
#[derive(Debug, Clone)]
pub struct WindowsView {
    state: Arc<Mutex<WindowsState>>,
}

impl WindowsView {
    /// State of the contact's window, or `None` if it is closed.
    #[must_use]
    pub fn state_of(&self, contact: &ContactId) -> Option<WindowState> {
        self.state
            .lock()
            .windows
            .iter()
            .find(|w| w.contact == *contact)
            .map(|w| w.state)
    }

    /// Whether the contact has a window (expanded or minimized).
    #[must_use]
    pub fn is_open(&self, contact: &ContactId) -> bool {
        self.state_of(contact).is_some()
    }

    /// Snapshot of one window.
    #[must_use]
    pub fn window(&self, contact: &ContactId) -> Option<ChatWindow> {
        self.state
            .lock()
            .windows
            .iter()
            .find(|w| w.contact == *contact)
            .cloned()
    }

    /// Number of open windows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().windows.len()
    }

    /// Whether no window is open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
