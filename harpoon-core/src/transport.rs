//! Transport collaborator: an opaque text-frame link to the chat server.
//!
//! The session talks to a [`Transport`] and receives callbacks through a
//! [`TransportHandler`]. [`WsTransport`] is the production implementation,
//! a WebSocket client driven by its own single-worker tokio runtime so that
//! network I/O never runs on a dispatch thread.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;

use crate::error::TransportError;

/// Identifies one open link. Ids are never reused within a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkId(pub u64);

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Callbacks for one connection attempt.
///
/// Callbacks run on the transport's I/O thread and must only enqueue work.
/// `on_close` fires exactly once per attempt, after `on_open` if the link
/// opened and after `on_fail` if it failed.
pub trait TransportHandler: Send + Sync + 'static {
    fn on_open(&self, link: LinkId);
    fn on_message(&self, payload: String);
    fn on_fail(&self, error: &TransportError);
    fn on_close(&self);
}

pub trait Transport: Send + Sync + 'static {
    /// Start a connection attempt. Returns once the attempt is scheduled;
    /// the outcome arrives through `handler`.
    fn connect(&self, uri: &str, handler: Arc<dyn TransportHandler>) -> Result<(), TransportError>;

    /// Queue one text frame on an open link.
    fn send(&self, link: LinkId, payload: &str) -> Result<(), TransportError>;

    /// Ask an open link to close. Unknown links are ignored.
    fn close(&self, link: LinkId);
}

enum Outbound {
    Text(String),
    Close,
}

type LinkTable = DashMap<LinkId, mpsc::UnboundedSender<Outbound>>;

/// WebSocket transport backed by `tokio-tungstenite`.
pub struct WsTransport {
    runtime: Option<Runtime>,
    links: Arc<LinkTable>,
    next_id: AtomicU64,
}

impl WsTransport {
    pub fn new() -> Result<Self, TransportError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("harpoon-io")
            .enable_all()
            .build()?;
        Ok(Self {
            runtime: Some(runtime),
            links: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    /// Number of links currently open.
    pub fn open_links(&self) -> usize {
        self.links.len()
    }
}

impl Transport for WsTransport {
    fn connect(&self, uri: &str, handler: Arc<dyn TransportHandler>) -> Result<(), TransportError> {
        let request = uri
            .into_client_request()
            .map_err(|e| TransportError::InvalidUri {
                uri: uri.to_string(),
                reason: e.to_string(),
            })?;
        let Some(runtime) = self.runtime.as_ref() else {
            return Err(TransportError::Open("transport is shut down".into()));
        };
        let id = LinkId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let links = Arc::clone(&self.links);
        tracing::debug!(link = %id, uri, "connecting");
        runtime.spawn(drive(id, request, handler, links));
        Ok(())
    }

    fn send(&self, link: LinkId, payload: &str) -> Result<(), TransportError> {
        let tx = self.links.get(&link).ok_or(TransportError::NotConnected(link))?;
        tx.send(Outbound::Text(payload.to_string()))
            .map_err(|_| TransportError::Send(format!("link {link} is closing")))
    }

    fn close(&self, link: LinkId) {
        if let Some(tx) = self.links.get(&link) {
            let _ = tx.send(Outbound::Close);
        }
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// Run one link from handshake to close.
async fn drive(
    id: LinkId,
    request: Request,
    handler: Arc<dyn TransportHandler>,
    links: Arc<LinkTable>,
) {
    let stream = match tokio_tungstenite::connect_async(request).await {
        Ok((stream, _response)) => stream,
        Err(e) => {
            tracing::warn!(link = %id, error = %e, "connect failed");
            handler.on_fail(&TransportError::Open(e.to_string()));
            handler.on_close();
            return;
        }
    };
    let (mut sink, mut source) = stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel();
    links.insert(id, tx);
    tracing::info!(link = %id, "link open");
    handler.on_open(id);

    loop {
        tokio::select! {
            frame = source.next() => match frame {
                Some(Ok(Message::Text(text))) => handler.on_message(text),
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!(link = %id, ?frame, "server closed link");
                    break;
                }
                // tungstenite answers pings itself; binary frames are not part of the protocol.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    handler.on_fail(&TransportError::Stream(e.to_string()));
                    break;
                }
                None => break,
            },
            outbound = rx.recv() => match outbound {
                Some(Outbound::Text(text)) => {
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        handler.on_fail(&TransportError::Send(e.to_string()));
                        break;
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = sink.send(Message::Close(None)).await;
                    let _ = sink.close().await;
                    break;
                }
            },
        }
    }

    links.remove(&id);
    tracing::info!(link = %id, "link closed");
    handler.on_close();
}
