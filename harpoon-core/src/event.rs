//! The two event families carried by the buses.
//!
//! [`ServiceEvent`]s flow toward the network session; [`UiEvent`]s flow
//! toward the presenter. The families never share a queue.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

/// Sender name used for locally generated status lines.
pub const SYSTEM_SENDER: &str = "system";
/// Sender name used for payloads that failed to parse.
pub const PARSE_ERROR_SENDER: &str = "parse-error";

/// Attribute key holding the sender's trip code.
pub const ATTR_TRIP: &str = "trip";
/// Attribute key set to `"1"` when the sender is a moderator.
pub const ATTR_MOD: &str = "mod";

/// Everything needed to (re)establish a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub server_uri: String,
    pub channel: String,
    pub username: String,
    pub password: String,
}

/// Commands and notifications handled by the chat session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceEvent {
    /// Send a chat line to the channel.
    SendMessage(String),

    /// Open a connection with these credentials.
    ///
    /// `reconnect` marks commands the session submitted to itself after an
    /// unexpected close; those are discarded if a deliberate disconnect has
    /// happened since.
    Connect {
        credentials: Credentials,
        reconnect: bool,
    },

    /// Close the connection on purpose; no reconnect follows.
    Disconnect,

    /// Link for connection attempt `attempt` finished its handshake.
    Connected { attempt: u64 },

    /// Link for connection attempt `attempt` is gone (closed or never opened).
    Disconnected { attempt: u64 },
}

/// Whether a user joined or left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RosterChange {
    Add,
    Remove,
}

/// How a chat line is presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Normal,
    Whisper,
    Emote,
    Status,
}

impl MessageKind {
    /// Whispers and emotes carry the sender inside the body text.
    pub fn shows_sender(self) -> bool {
        !matches!(self, MessageKind::Whisper | MessageKind::Emote)
    }
}

/// One line of chat traffic or one local status notice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub timestamp: DateTime<Utc>,
    pub sender: String,
    pub body: String,
    pub kind: MessageKind,
    /// Trip code and moderator flag, see [`ATTR_TRIP`] and [`ATTR_MOD`].
    pub attributes: BTreeMap<String, String>,
}

impl ChatMessage {
    pub fn new(sender: impl Into<String>, body: impl Into<String>, kind: MessageKind) -> Self {
        Self {
            timestamp: Utc::now(),
            sender: sender.into(),
            body: body.into(),
            kind,
            attributes: BTreeMap::new(),
        }
    }

    /// A status line from the client itself.
    pub fn status(body: impl Into<String>) -> Self {
        Self::new(SYSTEM_SENDER, body, MessageKind::Status)
    }

    /// A diagnostic for an inbound payload that could not be parsed.
    pub fn parse_failure(payload: &str, error: &dyn std::fmt::Display) -> Self {
        Self::new(
            PARSE_ERROR_SENDER,
            format!("{payload}, {error}"),
            MessageKind::Status,
        )
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_attribute(mut self, key: &str, value: impl Into<String>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    /// Trip code, if the sender has a non-empty one.
    pub fn trip(&self) -> Option<&str> {
        self.attributes
            .get(ATTR_TRIP)
            .map(String::as_str)
            .filter(|t| !t.is_empty())
    }

    pub fn is_mod(&self) -> bool {
        self.attributes.get(ATTR_MOD).is_some_and(|v| v == "1")
    }
}

/// Updates consumed by the presenter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    /// A line typed by the user; forwarded to the session, never stored.
    Input(String),

    /// Replace the whole user list.
    UserListReplace(Vec<String>),

    /// One user joined or left.
    UserDelta { name: String, change: RosterChange },

    /// A line for the transcript.
    ChatMessage(ChatMessage),
}

impl UiEvent {
    pub fn status(body: impl Into<String>) -> Self {
        UiEvent::ChatMessage(ChatMessage::status(body))
    }
}
