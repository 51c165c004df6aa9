//! In-memory transport for driving sessions from tests.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::TransportError;
use crate::transport::{LinkId, Transport, TransportHandler};

/// A transport whose callbacks are fired by the test, not by a network.
///
/// Each `connect` records a pending attempt. `open`, `deliver`, `fail` and
/// `finish` fire callbacks on the most recent attempt from the calling thread.
#[derive(Default)]
pub struct ScriptedTransport {
    state: Mutex<Script>,
}

#[derive(Default)]
struct Script {
    connects: Vec<String>,
    handlers: Vec<Arc<dyn TransportHandler>>,
    live: HashSet<LinkId>,
    sent: Vec<(LinkId, String)>,
    closed: Vec<LinkId>,
    refuse: bool,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every further `connect` fail synchronously.
    pub fn refuse_connects(&self) {
        self.state.lock().refuse = true;
    }

    pub fn connects(&self) -> Vec<String> {
        self.state.lock().connects.clone()
    }

    pub fn sent(&self) -> Vec<(LinkId, String)> {
        self.state.lock().sent.clone()
    }

    /// Frames sent so far, parsed as JSON, keeping only their `cmd`.
    pub fn sent_commands(&self) -> Vec<String> {
        self.sent()
            .iter()
            .filter_map(|(_, frame)| serde_json::from_str::<serde_json::Value>(frame).ok())
            .filter_map(|v| v["cmd"].as_str().map(str::to_string))
            .collect()
    }

    pub fn closed(&self) -> Vec<LinkId> {
        self.state.lock().closed.clone()
    }

    fn handler(&self, attempt: usize) -> Arc<dyn TransportHandler> {
        let state = self.state.lock();
        Arc::clone(&state.handlers[attempt])
    }

    fn latest(&self) -> usize {
        self.state.lock().handlers.len() - 1
    }

    /// Complete the handshake of the latest attempt with `link`.
    pub fn open(&self, link: LinkId) {
        self.open_attempt(self.latest(), link);
    }

    /// Complete the handshake of a specific attempt (0-based).
    pub fn open_attempt(&self, attempt: usize, link: LinkId) {
        let handler = self.handler(attempt);
        self.state.lock().live.insert(link);
        handler.on_open(link);
    }

    pub fn deliver(&self, payload: &str) {
        self.handler(self.latest()).on_message(payload.to_string());
    }

    pub fn fail(&self, reason: &str) {
        self.handler(self.latest())
            .on_fail(&TransportError::Stream(reason.to_string()));
    }

    /// End the latest attempt, as the I/O thread would after a close.
    pub fn finish(&self) {
        self.finish_attempt(self.latest());
    }

    pub fn finish_attempt(&self, attempt: usize) {
        let handler = self.handler(attempt);
        handler.on_close();
    }

    /// Simulate the server dropping `link`.
    pub fn drop_link(&self, link: LinkId) {
        self.state.lock().live.remove(&link);
        self.finish();
    }
}

impl Transport for ScriptedTransport {
    fn connect(&self, uri: &str, handler: Arc<dyn TransportHandler>) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.refuse {
            return Err(TransportError::InvalidUri {
                uri: uri.to_string(),
                reason: "refused by script".into(),
            });
        }
        state.connects.push(uri.to_string());
        state.handlers.push(handler);
        Ok(())
    }

    fn send(&self, link: LinkId, payload: &str) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if !state.live.contains(&link) {
            return Err(TransportError::NotConnected(link));
        }
        state.sent.push((link, payload.to_string()));
        Ok(())
    }

    fn close(&self, link: LinkId) {
        let mut state = self.state.lock();
        state.live.remove(&link);
        state.closed.push(link);
    }
}
