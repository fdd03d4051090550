//! Audible alerts for incoming messages.
//!
//! [`NotificationSignal`] decides whether an incoming message should play
//! a sound. The sound preference is read once at startup from a small JSON
//! file and written through on every toggle.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use chatdock_proto::contact::ContactId;
use chatdock_proto::message::Message;

use crate::chat::window::WindowState;

/// Errors that can occur when reading or writing the preference file.
#[derive(Debug, thiserror::Error)]
pub enum PreferenceError {
    /// Failed to read the preference file.
    #[error("failed to read preferences {path}: {source}")]
    Read {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to write the preference file.
    #[error("failed to write preferences {path}: {source}")]
    Write {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The file does not contain valid preferences.
    #[error("invalid preferences file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// User preferences persisted across sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Preferences {
    /// Whether incoming messages play a sound.
    pub sound_enabled: bool,
}

/// JSON file holding [`Preferences`].
#[derive(Debug, Clone)]
pub struct PreferenceFile {
    path: PathBuf,
}

impl PreferenceFile {
    /// Uses the file at `path`; nothing is read until [`load`](Self::load).
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the preference file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the stored preferences. A missing file yields `None`.
    ///
    /// # Errors
    ///
    /// Returns [`PreferenceError`] if the file exists but cannot be read
    /// or parsed.
    pub fn load(&self) -> Result<Option<Preferences>, PreferenceError> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PreferenceError::Read {
                path: self.path.clone(),
                source: e,
            }),
        }
    }

    /// Writes `prefs`, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns [`PreferenceError::Write`] if the file cannot be written.
    pub fn save(&self, prefs: &Preferences) -> Result<(), PreferenceError> {
        let write_err = |source| PreferenceError::Write {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        let contents = serde_json::to_string_pretty(prefs)?;
        std::fs::write(&self.path, contents).map_err(write_err)
    }
}

/// Decides when an incoming message plays an alert.
#[derive(Debug)]
pub struct NotificationSignal {
    me: ContactId,
    sound_enabled: AtomicBool,
    file: Option<PreferenceFile>,
}

impl NotificationSignal {
    /// Creates a signal with an in-memory preference only.
    #[must_use]
    pub const fn new(me: ContactId, sound_enabled: bool) -> Self {
        Self {
            me,
            sound_enabled: AtomicBool::new(sound_enabled),
            file: None,
        }
    }

    /// Creates a signal backed by `file`, reading it once.
    ///
    /// Falls back to `default_enabled` when the file is missing or
    /// unreadable; an unreadable file is logged.
    #[must_use]
    pub fn from_file(me: ContactId, file: PreferenceFile, default_enabled: bool) -> Self {
        let enabled = match file.load() {
            Ok(Some(prefs)) => prefs.sound_enabled,
            Ok(None) => default_enabled,
            Err(e) => {
                tracing::warn!(path = %file.path().display(), error = %e, "ignoring preference file");
                default_enabled
            }
        };
        Self {
            me,
            sound_enabled: AtomicBool::new(enabled),
            file: Some(file),
        }
    }

    /// Current sound preference.
    #[must_use]
    pub fn sound_enabled(&self) -> bool {
        self.sound_enabled.load(Ordering::SeqCst)
    }

    /// Changes the sound preference and writes it through to the file.
    ///
    /// The in-memory value changes even if the write fails.
    ///
    /// # Errors
    ///
    /// Returns [`PreferenceError`] if the preference file cannot be written.
    pub fn set_sound_enabled(&self, enabled: bool) -> Result<(), PreferenceError> {
        self.sound_enabled.store(enabled, Ordering::SeqCst);
        tracing::debug!(enabled, "sound preference changed");
        match &self.file {
            Some(file) => file.save(&Preferences {
                sound_enabled: enabled,
            }),
            None => Ok(()),
        }
    }

    /// Whether `message` should play an alert.
    ///
    /// True exactly when someone else sent it, their window is closed or
    /// minimized, sound is enabled, and the current user is online.
    #[must_use]
    pub fn should_alert(&self, message: &Message, window: Option<WindowState>, self_online: bool) -> bool {
        message.sender != self.me
            && window != Some(WindowState::Expanded)
            && self.sound_enabled()
            && self_online
    }
}
