//! Terminal front end for the harpoon chat client.

use std::path::PathBuf;

use clap::Parser;

pub mod config;
pub mod input;
pub mod signals;
pub mod terminal;
pub mod ui;

/// Command-line arguments. Anything left out falls back to the config file,
/// then to built-in defaults.
#[derive(Debug, Default, Parser)]
#[command(name = "harpoon", version, about = "Terminal client for hack.chat")]
pub struct Cli {
    /// WebSocket endpoint of the chat server.
    #[arg(long)]
    pub server: Option<String>,

    /// Channel to join.
    #[arg(long, short)]
    pub channel: Option<String>,

    /// Nickname to join with.
    #[arg(long, short)]
    pub username: Option<String>,

    /// Trip-code password.
    #[arg(long, short, env = "HARPOON_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Where to write the log file.
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}
