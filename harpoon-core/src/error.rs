//! Error types for the core engine.
//!
//! None of these terminate a dispatch thread: handlers convert transport and
//! parse failures into status messages for the transcript. Only [`BusError`]
//! propagates out: without its dispatch threads or timer runtime the client
//! cannot run at all.

use std::io;

use crate::transport::LinkId;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The server URI was rejected before any connection attempt.
    #[error("invalid server uri {uri}: {reason}")]
    InvalidUri { uri: String, reason: String },
    /// The connection attempt itself failed (DNS, TCP, TLS, handshake).
    #[error("connection failed: {0}")]
    Open(String),
    /// No live link with this id.
    #[error("link {0} is not connected")]
    NotConnected(LinkId),
    /// An open link failed while reading.
    #[error("connection lost: {0}")]
    Stream(String),
    /// The link existed but the frame could not be handed to it.
    #[error("send failed: {0}")]
    Send(String),
    /// The I/O runtime could not be created.
    #[error("transport runtime: {0}")]
    Runtime(#[from] io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payload is not a json object")]
    NotAnObject,
    #[error("missing field `{0}`")]
    MissingField(&'static str),
}

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("bus {0} already has a dispatch thread")]
    AlreadyStarted(&'static str),
    #[error("failed to spawn dispatch thread for bus {bus}: {source}")]
    Spawn {
        bus: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("failed to start session timers: {0}")]
    Timers(#[source] io::Error),
}
