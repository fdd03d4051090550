//! The chat session: one object owning all presence and messaging state.
//!
//! [`ChatSession`] wires the components together and is the only surface
//! the UI talks to. UI actions go in through its methods; state comes back
//! out as read-only projections, with a [`SessionEvent`] channel announcing
//! when a projection changed.
//!
//! The session owns two [`TaskScope`]s: the message feed, alive from
//! [`start`](ChatSession::start) to [`shutdown`](ChatSession::shutdown),
//! and presence tracking, alive while the user is online.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};

use chatdock_proto::contact::{Contact, ContactId};
use chatdock_proto::event::{ChangeEvent, Topic};
use chatdock_proto::key::ConversationKey;
use chatdock_proto::message::{self, Message};

use crate::bus::{ChangeHandler, EventBus};
use crate::chat::SendError;
use crate::chat::conversation::{ConversationStore, MessageAction, Reduced};
use crate::chat::send::{MessageSender, PendingSend};
use crate::chat::window::{
    ChatWindow, ChatWindowManager, DEFAULT_MAX_OPEN_WINDOWS, OpenOutcome, WindowState,
};
use crate::clock::{Clock, SystemClock};
use crate::config::ClientConfig;
use crate::events::{EventSink, SessionEvent};
use crate::notify::{NotificationSignal, PreferenceError, PreferenceFile};
use crate::presence::{DEFAULT_POLL_INTERVAL, DisconnectNotice, PresenceTracker};
use crate::scope::TaskScope;
use crate::store::{PersistentStore, StoreError};
use crate::unread::UnreadCounter;

/// Tunables for a [`ChatSession`].
#[derive(Clone)]
pub struct SessionOptions {
    /// Interval of the fallback presence poll.
    pub poll_interval: Duration,
    /// Maximum number of simultaneously open chat windows.
    pub max_open_windows: usize,
    /// Maximum message length in characters.
    pub max_message_len: usize,
    /// Capacity of the session event channel.
    pub event_buffer: usize,
    /// Where the sound preference is persisted, if anywhere.
    pub preferences: Option<PreferenceFile>,
    /// Sound preference used when no preference is stored.
    pub sound_enabled_default: bool,
    /// Time source for pending messages and notices.
    pub clock: Arc<dyn Clock>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_open_windows: DEFAULT_MAX_OPEN_WINDOWS,
            max_message_len: message::DEFAULT_MAX_MESSAGE_LEN,
            event_buffer: 256,
            preferences: None,
            sound_enabled_default: true,
            clock: Arc::new(SystemClock),
        }
    }
}

impl SessionOptions {
    /// Builds options from a resolved client configuration.
    #[must_use]
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            poll_interval: config.poll_interval,
            max_open_windows: config.max_open_windows,
            max_message_len: config.max_message_len,
            event_buffer: config.event_buffer,
            preferences: config.preferences_path.clone().map(PreferenceFile::new),
            sound_enabled_default: config.sound_enabled_default,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces the time source.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// Components shared between the session and its feed listener.
struct Core<S> {
    me: ContactId,
    store: Arc<S>,
    presence: Arc<PresenceTracker<S>>,
    unread: UnreadCounter<S>,
    conversations: Arc<ConversationStore<S>>,
    windows: ChatWindowManager,
    sender: MessageSender<S>,
    notifications: NotificationSignal,
    events: EventSink,
    self_online: AtomicBool,
    tracking: AtomicBool,
}

impl<S: PersistentStore> Core<S> {
    async fn on_message(&self, message: Message) {
        if message.sender != self.me && message.receiver != self.me {
            return;
        }
        let contact = message.counterpart(&self.me).clone();
        let window = self.windows.view().state_of(&contact);

        if window.is_some() {
            let message_id = message.id.clone();
            let outcome = self
                .conversations
                .apply(&message.conversation, MessageAction::Incoming(message.clone()));
            if outcome == Some(Reduced::Inserted) {
                self.events.emit(SessionEvent::MessageAppended {
                    contact: contact.clone(),
                    message_id,
                });
            }
        }

        if message.sender == self.me {
            return;
        }

        if window == Some(WindowState::Expanded) {
            if let Err(e) = self.unread.mark_read(&contact).await {
                tracing::warn!(%contact, error = %e, "could not mark visible message read");
            }
        } else {
            self.unread.on_message_inserted(&message, window).await;
        }

        let self_online = self.self_online.load(Ordering::SeqCst);
        if self.notifications.should_alert(&message, window, self_online) {
            tracing::debug!(from = %contact, "alerting for incoming message");
            self.events.emit(SessionEvent::Alert { from: contact });
        }
    }

    /// Releases everything scoped to a window that just closed.
    fn release_window(&self, window: &ChatWindow) {
        self.conversations.release(&window.conversation);
        self.presence.clear_notice(&window.contact);
        self.events.emit(SessionEvent::WindowClosed {
            contact: window.contact.clone(),
        });
    }

    async fn mark_read_logged(&self, contact: &ContactId) {
        if let Err(e) = self.unread.mark_read(contact).await {
            tracing::warn!(%contact, error = %e, "mark read failed");
        }
    }
}

impl<S: PersistentStore + 'static> ChangeHandler for Core<S> {
    async fn on_change(&self, event: ChangeEvent) {
        match event {
            ChangeEvent::MessageInserted(message) => self.on_message(message).await,
            ChangeEvent::ProfileUpdated(_) => {}
        }
    }
}

/// Presence and direct-messaging state for one signed-in user.
pub struct ChatSession<S, B> {
    core: Arc<Core<S>>,
    bus: Arc<B>,
    poll_interval: Duration,
    feed: Mutex<Option<TaskScope>>,
    tracking: Mutex<Option<TaskScope>>,
}

impl<S, B> ChatSession<S, B>
where
    S: PersistentStore + 'static,
    B: EventBus + 'static,
{
    /// Creates a session for `me` and the receiver for its events.
    ///
    /// Nothing is loaded or subscribed until [`start`](Self::start).
    pub fn new(
        me: ContactId,
        store: Arc<S>,
        bus: Arc<B>,
        options: SessionOptions,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (events, rx) = EventSink::channel(options.event_buffer);
        let windows = ChatWindowManager::new(me.clone(), options.max_open_windows);
        let conversations = Arc::new(ConversationStore::new(Arc::clone(&store)));
        let presence = Arc::new(PresenceTracker::new(
            me.clone(),
            Arc::clone(&store),
            windows.view(),
            events.clone(),
            Arc::clone(&options.clock),
        ));
        let sender = MessageSender::new(
            me.clone(),
            Arc::clone(&store),
            Arc::clone(&conversations),
            windows.clone(),
            events.clone(),
            Arc::clone(&options.clock),
        )
        .with_max_len(options.max_message_len);
        let notifications = match options.preferences {
            Some(file) => NotificationSignal::from_file(me.clone(), file, options.sound_enabled_default),
            None => NotificationSignal::new(me.clone(), options.sound_enabled_default),
        };

        let core = Core {
            unread: UnreadCounter::new(me.clone(), Arc::clone(&store), events.clone()),
            me,
            store,
            presence,
            conversations,
            windows,
            sender,
            notifications,
            events,
            self_online: AtomicBool::new(false),
            tracking: AtomicBool::new(false),
        };

        let session = Self {
            core: Arc::new(core),
            bus,
            poll_interval: options.poll_interval,
            feed: Mutex::new(None),
            tracking: Mutex::new(None),
        };
        (session, rx)
    }

    /// The signed-in user.
    #[must_use]
    pub fn me(&self) -> &ContactId {
        &self.core.me
    }

    /// Subscribes to the message feed and goes online, which loads
    /// contacts and unread counts.
    ///
    /// Failures are logged; the session keeps running on whatever state it
    /// has. Calling `start` twice does not subscribe twice.
    pub async fn start(&self) {
        tracing::info!(user = %self.core.me, "starting chat session");
        {
            let mut feed = self.feed.lock().await;
            if feed.is_none() {
                let mut scope = TaskScope::new("message-feed");
                if let Err(e) = scope
                    .listen(self.bus.as_ref(), Topic::MessageInserted, Arc::clone(&self.core))
                    .await
                {
                    tracing::warn!(error = %e, "message feed subscription failed");
                }
                *feed = Some(scope);
            }
        }
        self.set_presence(true).await;
    }

    /// Sets the user's own presence and switches tracking accordingly.
    ///
    /// Going online reloads contacts and unread counts, then starts the
    /// presence subscription and poll; going offline releases both. A
    /// failed store write is logged; tracking still follows the requested
    /// state.
    pub async fn set_presence(&self, online: bool) {
        if let Err(e) = self.core.store.set_presence(&self.core.me, online).await {
            tracing::warn!(online, error = %e, "could not persist own presence");
        }
        self.core.self_online.store(online, Ordering::SeqCst);

        let mut tracking = self.tracking.lock().await;
        match (online, tracking.is_some()) {
            (true, false) => {
                if let Err(e) = self.core.presence.load().await {
                    tracing::warn!(error = %e, "could not load contacts");
                }
                self.core.unread.reload().await;
                let scope = self
                    .core
                    .presence
                    .activate(self.bus.as_ref(), self.poll_interval)
                    .await;
                *tracking = Some(scope);
            }
            (false, true) => {
                if let Some(scope) = tracking.take() {
                    scope.release(self.bus.as_ref()).await;
                }
            }
            _ => return,
        }
        drop(tracking);

        self.core.tracking.store(online, Ordering::SeqCst);
        tracing::info!(active = online, "presence tracking changed");
        self.core
            .events
            .emit(SessionEvent::TrackingChanged { active: online });
    }

    /// Releases every subscription and timer the session owns.
    pub async fn shutdown(&self) {
        if let Some(scope) = self.tracking.lock().await.take() {
            scope.release(self.bus.as_ref()).await;
            self.core.tracking.store(false, Ordering::SeqCst);
        }
        if let Some(scope) = self.feed.lock().await.take() {
            scope.release(self.bus.as_ref()).await;
        }
        tracing::info!(user = %self.core.me, "chat session shut down");
    }

    /// Opens a chat window for `contact`, loads its history and marks the
    /// conversation read.
    ///
    /// If the window is already open only the read-mark is repeated.
    pub async fn open(&self, contact: &ContactId) -> OpenOutcome {
        let outcome = self.core.windows.open(contact);
        match &outcome {
            OpenOutcome::AlreadyOpen => {}
            OpenOutcome::Opened { evicted, .. } => {
                if let Some(window) = evicted {
                    self.core.release_window(window);
                }
                self.core.events.emit(SessionEvent::WindowOpened {
                    contact: contact.clone(),
                });
                let key = ConversationKey::between(&self.core.me, contact);
                self.core.conversations.track(&key);
                if let Err(e) = self.core.conversations.load_history(&key).await {
                    tracing::warn!(%contact, error = %e, "could not load history");
                }
            }
        }
        self.core.mark_read_logged(contact).await;
        outcome
    }

    /// Collapses the contact's window.
    pub fn minimize(&self, contact: &ContactId) -> bool {
        let changed = self.core.windows.minimize(contact);
        if changed {
            self.emit_state(contact);
        }
        changed
    }

    /// Expands the contact's window.
    pub fn restore(&self, contact: &ContactId) -> bool {
        let changed = self.core.windows.restore(contact);
        if changed {
            self.emit_state(contact);
        }
        changed
    }

    /// Closes the contact's window, dropping its draft, notice and cached
    /// messages.
    pub fn close(&self, contact: &ContactId) -> bool {
        match self.core.windows.close(contact) {
            Some(window) => {
                self.core.release_window(&window);
                true
            }
            None => false,
        }
    }

    /// Replaces the draft text of the contact's window.
    pub fn set_draft(&self, contact: &ContactId, text: &str) -> bool {
        self.core.windows.set_draft(contact, text)
    }

    /// Sends `text` to `contact` with the optimistic protocol.
    ///
    /// # Errors
    ///
    /// Returns [`SendError`] when validation fails, no window is open, or
    /// the store rejects the write (after rolling back).
    pub async fn send(&self, contact: &ContactId, text: &str) -> Result<Message, SendError> {
        self.core.sender.send(contact, text).await
    }

    /// First half of [`send`](Self::send): appends the pending message.
    ///
    /// # Errors
    ///
    /// Returns [`SendError`] when validation fails or no window is open.
    pub fn begin_send(&self, contact: &ContactId, text: &str) -> Result<PendingSend, SendError> {
        self.core.sender.begin(contact, text)
    }

    /// Second half of [`send`](Self::send): writes and reconciles.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Store`] if the write fails.
    pub async fn dispatch(&self, pending: PendingSend) -> Result<Message, SendError> {
        self.core.sender.dispatch(pending).await
    }

    /// Marks every message from `contact` read.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store write fails; the badge has been
    /// restored by then.
    pub async fn mark_read(&self, contact: &ContactId) -> Result<(), StoreError> {
        self.core.unread.mark_read(contact).await
    }

    /// Changes the sound preference.
    ///
    /// # Errors
    ///
    /// Returns [`PreferenceError`] if the preference cannot be persisted.
    pub fn set_sound_enabled(&self, enabled: bool) -> Result<(), PreferenceError> {
        self.core.notifications.set_sound_enabled(enabled)
    }

    // -- Projections --

    /// Open windows in slot order.
    #[must_use]
    pub fn windows(&self) -> Vec<ChatWindow> {
        self.core.windows.windows()
    }

    /// One open window.
    #[must_use]
    pub fn window(&self, contact: &ContactId) -> Option<ChatWindow> {
        self.core.windows.window(contact)
    }

    /// Non-zero unread counts by sender.
    #[must_use]
    pub fn unread(&self) -> Vec<(ContactId, u32)> {
        self.core.unread.snapshot()
    }

    /// Unread count for one sender.
    #[must_use]
    pub fn unread_count(&self, contact: &ContactId) -> u32 {
        self.core.unread.count(contact)
    }

    /// Sum of all unread counts.
    #[must_use]
    pub fn unread_total(&self) -> u32 {
        self.core.unread.total()
    }

    /// Active disconnect notices.
    #[must_use]
    pub fn notices(&self) -> Vec<DisconnectNotice> {
        self.core.presence.notices()
    }

    /// Contacts with their online flag.
    #[must_use]
    pub fn contacts(&self) -> Vec<Contact> {
        self.core.presence.contacts()
    }

    /// A contact's online flag, if the contact is known.
    #[must_use]
    pub fn is_online(&self, contact: &ContactId) -> Option<bool> {
        self.core.presence.is_online(contact)
    }

    /// Messages of the conversation with `contact`; empty unless its window
    /// is open.
    #[must_use]
    pub fn messages(&self, contact: &ContactId) -> Vec<Message> {
        self.core
            .conversations
            .messages(&ConversationKey::between(&self.core.me, contact))
    }

    /// Whether presence tracking is active.
    #[must_use]
    pub fn is_tracking(&self) -> bool {
        self.core.tracking.load(Ordering::SeqCst)
    }

    /// Whether the user is currently online.
    #[must_use]
    pub fn is_self_online(&self) -> bool {
        self.core.self_online.load(Ordering::SeqCst)
    }

    /// Current sound preference.
    #[must_use]
    pub fn sound_enabled(&self) -> bool {
        self.core.notifications.sound_enabled()
    }

    fn emit_state(&self, contact: &ContactId) {
        if let Some(state) = self.core.windows.view().state_of(contact) {
            self.core.events.emit(SessionEvent::WindowStateChanged {
                contact: contact.clone(),
                state,
            });
        }
    }
}
