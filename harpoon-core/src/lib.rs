//! Core engine for the harpoon chat client.
//!
//! Two event buses decouple the threads of the client: the session bus
//! carries commands toward the network ([`event::ServiceEvent`]) and the
//! presenter bus carries updates toward the terminal ([`event::UiEvent`]).
//! Each bus owns a [`queue::BlockingQueue`] and one dispatch thread.
//!
//! ## Threads
//!
//! - session dispatch: drains the session bus into [`session::ChatSession`]
//! - presenter dispatch: drains the presenter bus into [`presenter::Presenter`]
//! - transport I/O: the tokio runtime owned by [`transport::WsTransport`]
//! - keepalive: one per open link, pings every 60 seconds
//! - render/input: owned by the front end, reads [`presenter::View`]
//!
//! Every loop observes the same [`tokio_util::sync::CancellationToken`], so
//! shutdown latency is bounded by the dispatch poll interval.

pub mod bus;
pub mod codec;
pub mod error;
pub mod event;
pub mod orchestrator;
pub mod presenter;
pub mod queue;
pub mod session;
pub mod transport;
mod wrap;

#[cfg(test)]
pub(crate) mod testing;

pub use tokio_util::sync::CancellationToken;
