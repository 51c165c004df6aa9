//! Persistent configuration for harpoon.
//!
//! Config file lives at `~/.config/harpoon/config.toml`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use harpoon_core::event::Credentials;
use harpoon_core::session::{ReconnectConfig, SessionConfig};
use serde::Deserialize;

use crate::Cli;

/// Default hack.chat endpoint.
pub const DEFAULT_SERVER: &str = "wss://hack.chat/chat-ws";
/// Default channel to join.
pub const DEFAULT_CHANNEL: &str = "programming";

/// User configuration (persisted in config.toml). Every field is optional.
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct Config {
    /// WebSocket endpoint. Default: wss://hack.chat/chat-ws
    pub server: Option<String>,
    /// Nickname.
    pub username: Option<String>,
    /// Channel to join.
    pub channel: Option<String>,
    /// Seconds between keepalive pings.
    pub keepalive_secs: Option<u64>,
    /// First reconnect delay, in milliseconds.
    pub reconnect_initial_ms: Option<u64>,
    /// Reconnect delay cap, in seconds.
    pub reconnect_max_secs: Option<u64>,
    /// Log file path.
    pub log_file: Option<PathBuf>,
}

fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("harpoon")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// `<cache dir>/harpoon/harpoon.log`
pub fn default_log_file() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("harpoon")
        .join("harpoon.log")
}

impl Config {
    pub fn load() -> Self {
        Self::load_from(&config_path())
    }

    /// Read `path`, warning on stderr and falling back to defaults when the
    /// file is unreadable or malformed. A missing file is not an error.
    pub fn load_from(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(s) => match toml::from_str(&s) {
                    Ok(c) => return c,
                    Err(e) => eprintln!("Warning: bad config file {}: {e}", path.display()),
                },
                Err(e) => eprintln!("Warning: can't read {}: {e}", path.display()),
            }
        }
        Self::default()
    }
}

/// Effective settings after merging CLI args > config file > defaults.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub server: String,
    pub channel: String,
    pub username: String,
    pub password: String,
    pub log_file: PathBuf,
    pub session: SessionConfig,
}

impl Resolved {
    pub fn merge(cli: &Cli, config: &Config) -> Self {
        let server = cli
            .server
            .clone()
            .or_else(|| config.server.clone())
            .unwrap_or_else(|| DEFAULT_SERVER.to_string());

        let channel = cli
            .channel
            .clone()
            .or_else(|| config.channel.clone())
            .unwrap_or_else(|| DEFAULT_CHANNEL.to_string());

        let username = cli
            .username
            .clone()
            .or_else(|| config.username.clone())
            .unwrap_or_else(|| whoami::fallible::username().unwrap_or_else(|_| "guest".to_string()));

        let log_file = cli
            .log_file
            .clone()
            .or_else(|| config.log_file.clone())
            .unwrap_or_else(default_log_file);

        let defaults = SessionConfig::default();
        let session = SessionConfig {
            keepalive_interval: config
                .keepalive_secs
                .map_or(defaults.keepalive_interval, Duration::from_secs),
            reconnect: ReconnectConfig {
                initial_delay: config
                    .reconnect_initial_ms
                    .map_or(defaults.reconnect.initial_delay, Duration::from_millis),
                max_delay: config
                    .reconnect_max_secs
                    .map_or(defaults.reconnect.max_delay, Duration::from_secs),
                ..defaults.reconnect
            },
        };

        Self {
            server,
            channel,
            username,
            password: cli.password.clone().unwrap_or_default(),
            log_file,
            session,
        }
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            server_uri: self.server.clone(),
            channel: self.channel.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }
}
