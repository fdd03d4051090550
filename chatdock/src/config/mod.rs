//! Client configuration.
//!
//! Every setting is resolved from, in order of precedence: command-line
//! flags, `CHATDOCK_*` environment variables (read by clap), the TOML file
//! at `~/.config/chatdock/config.toml`, and built-in defaults.
//!
//! The default file is optional. A file named with `--config` must exist.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::chat::window::DEFAULT_MAX_OPEN_WINDOWS;
use crate::presence::DEFAULT_POLL_INTERVAL;

/// Why a configuration file could not be used.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file exists but could not be read, or an explicit path is missing.
    #[error("cannot read {path}: {source}")]
    ReadFile {
        /// File that was read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The file is not valid TOML or has a field of the wrong type.
    #[error("invalid config file: {0}")]
    ParseToml(#[from] toml::de::Error),
}

// -- File layout: every key is optional so a file may set any subset --

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    session: SessionFileConfig,
    presence: PresenceFileConfig,
    chat: ChatFileConfig,
    notifications: NotificationsFileConfig,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SessionFileConfig {
    user_id: Option<String>,
    event_buffer: Option<usize>,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct PresenceFileConfig {
    poll_interval_secs: Option<u64>,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ChatFileConfig {
    max_open_windows: Option<usize>,
    max_message_len: Option<usize>,
    timestamp_format: Option<String>,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct NotificationsFileConfig {
    preferences_path: Option<PathBuf>,
    sound_enabled_default: Option<bool>,
}

/// Settings after every layer has been applied.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Session --
    /// Identity of the signed-in user.
    pub user_id: Option<String>,
    /// Capacity of the session event channel.
    pub event_buffer: usize,

    // -- Presence --
    /// Interval of the fallback presence poll.
    pub poll_interval: Duration,

    // -- Chat --
    /// Maximum number of simultaneously open chat windows.
    pub max_open_windows: usize,
    /// Maximum message length in characters.
    pub max_message_len: usize,
    /// chrono format used when displaying timestamps.
    pub timestamp_format: String,

    // -- Notifications --
    /// Where the sound preference is stored.
    pub preferences_path: Option<PathBuf>,
    /// Sound preference used when no preference file exists.
    pub sound_enabled_default: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_id: None,
            event_buffer: 256,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_open_windows: DEFAULT_MAX_OPEN_WINDOWS,
            max_message_len: chatdock_proto::message::DEFAULT_MAX_MESSAGE_LEN,
            timestamp_format: "%H:%M".to_string(),
            preferences_path: default_preferences_path(),
            sound_enabled_default: true,
        }
    }
}

impl ClientConfig {
    /// Reads the config file named by `cli` (or the default one) and
    /// layers `cli` on top of it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed. A
    /// missing default file is not an error.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = match cli.config.as_deref() {
            Some(path) => read_config(path, true)?,
            None => match default_config_path() {
                Some(path) => read_config(&path, false)?,
                None => ConfigFile::default(),
            },
        };
        Ok(Self::merge(cli, &file))
    }

    /// Flags win over the file, the file wins over defaults.
    fn merge(cli: &CliArgs, file: &ConfigFile) -> Self {
        let fallback = Self::default();

        Self {
            user_id: cli.user.clone().or_else(|| file.session.user_id.clone()),
            event_buffer: file.session.event_buffer.unwrap_or(fallback.event_buffer),
            poll_interval: cli
                .poll_interval_secs
                .or(file.presence.poll_interval_secs)
                .map_or(fallback.poll_interval, Duration::from_secs),
            max_open_windows: file
                .chat
                .max_open_windows
                .unwrap_or(fallback.max_open_windows),
            max_message_len: file
                .chat
                .max_message_len
                .unwrap_or(fallback.max_message_len),
            timestamp_format: cli
                .timestamp_format
                .clone()
                .or_else(|| file.chat.timestamp_format.clone())
                .unwrap_or(fallback.timestamp_format),
            preferences_path: cli
                .preferences
                .clone()
                .or_else(|| file.notifications.preferences_path.clone())
                .or(fallback.preferences_path),
            sound_enabled_default: file
                .notifications
                .sound_enabled_default
                .unwrap_or(fallback.sound_enabled_default),
        }
    }
}

/// Command-line flags; most also read a `CHATDOCK_*` variable.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Realtime presence and direct-messaging demo")]
pub struct CliArgs {
    /// Identity of the signed-in user.
    #[arg(long, env = "CHATDOCK_USER")]
    pub user: Option<String>,

    /// Config file to read instead of `~/.config/chatdock/config.toml`.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Fallback presence poll interval in seconds.
    #[arg(long, env = "CHATDOCK_POLL_INTERVAL")]
    pub poll_interval_secs: Option<u64>,

    /// chrono format for displayed timestamps.
    #[arg(long)]
    pub timestamp_format: Option<String>,

    /// Path to the preference file (default: `~/.config/chatdock/preferences.json`).
    #[arg(long, env = "CHATDOCK_PREFERENCES")]
    pub preferences: Option<PathBuf>,

    /// Default tracing filter when `RUST_LOG` is unset.
    #[arg(long, default_value = "info", env = "CHATDOCK_LOG")]
    pub log_level: String,

    /// Log file; defaults to `chatdock.log` in the temp directory.
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("chatdock").join("config.toml"))
}

fn default_preferences_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("chatdock").join("preferences.json"))
}

/// Parses the TOML file at `path`. When the file is absent and not
/// `required`, an empty layer is returned.
fn read_config(path: &Path, required: bool) -> Result<ConfigFile, ConfigError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(ConfigFile::default());
        }
        Err(source) => {
            return Err(ConfigError::ReadFile {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    Ok(toml::from_str(&text)?)
}
