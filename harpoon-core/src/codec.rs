//! hack.chat wire format.
//!
//! Every frame is a JSON object with a `cmd` field. [`parse`] classifies one
//! inbound frame into zero or more [`UiEvent`]s in a fixed order and has no
//! side effects; [`Command`] builds outbound frames.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Value, json};

use crate::error::ParseError;
use crate::event::{
    ATTR_MOD, ATTR_TRIP, ChatMessage, MessageKind, RosterChange, SYSTEM_SENDER, UiEvent,
};

/// Frames the client sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Join { channel: String, nick: String },
    Chat { text: String },
    Ping,
}

impl Command {
    /// Join `channel`, authenticating with a trip password when one is set.
    pub fn join(channel: &str, username: &str, password: &str) -> Self {
        let nick = if password.is_empty() {
            username.to_string()
        } else {
            format!("{username}#{password}")
        };
        Command::Join {
            channel: channel.to_string(),
            nick,
        }
    }

    pub fn encode(&self) -> String {
        match self {
            Command::Join { channel, nick } => {
                json!({ "cmd": "join", "channel": channel, "nick": nick }).to_string()
            }
            Command::Chat { text } => json!({ "cmd": "chat", "text": text }).to_string(),
            Command::Ping => json!({ "cmd": "ping" }).to_string(),
        }
    }
}

/// Classify one inbound payload.
///
/// Unknown commands yield no events. Anything that is not a JSON object with
/// a string `cmd` is a [`ParseError`].
pub fn parse(payload: &str) -> Result<Vec<UiEvent>, ParseError> {
    let root: Value = serde_json::from_str(payload)?;
    if !root.is_object() {
        return Err(ParseError::NotAnObject);
    }
    let cmd = root["cmd"].as_str().ok_or(ParseError::MissingField("cmd"))?;

    let events = match cmd {
        "chat" => {
            let text = str_field(&root, "text").replace('\0', "");
            let mut msg = ChatMessage::new(
                root["nick"].as_str().unwrap_or(SYSTEM_SENDER),
                text,
                MessageKind::Normal,
            )
            .with_timestamp(timestamp(&root));
            if let Some(trip) = non_empty(&root, "trip") {
                msg = msg.with_attribute(ATTR_TRIP, trip);
            }
            if root["mod"].as_bool().unwrap_or(false) {
                msg = msg.with_attribute(ATTR_MOD, "1");
            }
            vec![UiEvent::ChatMessage(msg)]
        }
        "warn" => vec![status(&root, str_field(&root, "text"))],
        "info" => match root["type"].as_str().unwrap_or("") {
            "whisper" => {
                let mut msg = ChatMessage::new(
                    str_field(&root, "from"),
                    str_field(&root, "text"),
                    MessageKind::Whisper,
                )
                .with_timestamp(timestamp(&root));
                if let Some(trip) = non_empty(&root, "trip") {
                    msg = msg.with_attribute(ATTR_TRIP, trip);
                }
                if root["utype"].as_str() == Some("mod") {
                    msg = msg.with_attribute(ATTR_MOD, "1");
                }
                vec![UiEvent::ChatMessage(msg)]
            }
            "emote" => vec![emote(&root)],
            _ => match non_empty(&root, "text") {
                Some(text) => vec![status(&root, text)],
                None => Vec::new(),
            },
        },
        "emote" => vec![emote(&root)],
        "onlineAdd" => {
            let nick = str_field(&root, "nick");
            vec![
                UiEvent::UserDelta {
                    name: nick.to_string(),
                    change: RosterChange::Add,
                },
                status(&root, &format!("{nick} has joined the channel")),
            ]
        }
        "onlineRemove" => {
            let nick = str_field(&root, "nick");
            vec![
                status(&root, &format!("{nick} has left the channel")),
                UiEvent::UserDelta {
                    name: nick.to_string(),
                    change: RosterChange::Remove,
                },
            ]
        }
        "onlineSet" => online_set(&root).into_iter().collect(),
        other => {
            tracing::trace!(cmd = other, "ignoring unhandled command");
            Vec::new()
        }
    };
    Ok(events)
}

fn online_set(root: &Value) -> Option<UiEvent> {
    if let Some(nicks) = root["nicks"].as_array() {
        let names = nicks
            .iter()
            .map(|n| n.as_str().unwrap_or_default().to_string())
            .collect();
        return Some(UiEvent::UserListReplace(names));
    }
    // Newer servers send full user objects instead of a nick list.
    let users = root["users"].as_array()?;
    let names = users
        .iter()
        .filter_map(|u| u["nick"].as_str())
        .map(str::to_string)
        .collect();
    Some(UiEvent::UserListReplace(names))
}

fn emote(root: &Value) -> UiEvent {
    UiEvent::ChatMessage(
        ChatMessage::new(
            str_field(root, "nick"),
            str_field(root, "text"),
            MessageKind::Emote,
        )
        .with_timestamp(timestamp(root)),
    )
}

fn status(root: &Value, text: &str) -> UiEvent {
    UiEvent::ChatMessage(ChatMessage::status(text).with_timestamp(timestamp(root)))
}

fn str_field<'a>(root: &'a Value, key: &str) -> &'a str {
    root[key].as_str().unwrap_or("")
}

fn non_empty<'a>(root: &'a Value, key: &str) -> Option<&'a str> {
    root[key].as_str().filter(|s| !s.is_empty())
}

/// Server timestamps are integral milliseconds; anything else means "now".
fn timestamp(root: &Value) -> DateTime<Utc> {
    root["time"]
        .as_i64()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now)
}
