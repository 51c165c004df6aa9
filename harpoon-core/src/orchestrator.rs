//! Wires the session and presenter buses together.
//!
//! The session's UI events go to the presenter bus, and the presenter's
//! input events go back to the session bus. Both dispatch loops share one
//! cancellation token; cancelling it (or dropping the orchestrator) stops
//! them within one poll interval.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::bus::{DEFAULT_POLL_INTERVAL, EventBus};
use crate::error::BusError;
use crate::event::{Credentials, ServiceEvent, UiEvent};
use crate::presenter::{Presenter, View};
use crate::session::{ChatSession, SessionConfig};
use crate::transport::Transport;

pub struct Orchestrator {
    shutdown: CancellationToken,
    session_bus: EventBus<ServiceEvent>,
    presenter_bus: EventBus<UiEvent>,
    view: Arc<View>,
}

impl Orchestrator {
    /// Build both buses and start their dispatch threads.
    pub fn start(
        transport: Arc<dyn Transport>,
        config: SessionConfig,
        shutdown: CancellationToken,
    ) -> Result<Self, BusError> {
        Self::start_with_poll_interval(transport, config, shutdown, DEFAULT_POLL_INTERVAL)
    }

    pub fn start_with_poll_interval(
        transport: Arc<dyn Transport>,
        config: SessionConfig,
        shutdown: CancellationToken,
        poll_interval: Duration,
    ) -> Result<Self, BusError> {
        let mut session_bus =
            EventBus::new("session", shutdown.clone()).with_poll_interval(poll_interval);
        let mut presenter_bus =
            EventBus::new("presenter", shutdown.clone()).with_poll_interval(poll_interval);
        let view = Arc::new(View::new());

        let session = ChatSession::new(
            transport,
            config,
            presenter_bus.sender(),
            session_bus.sender(),
            shutdown.clone(),
        )
        .map_err(BusError::Timers)?;
        let presenter = Presenter::new(Arc::clone(&view), session_bus.sender());

        session_bus.start(session)?;
        presenter_bus.start(presenter)?;
        tracing::debug!("dispatch threads running");

        Ok(Self {
            shutdown,
            session_bus,
            presenter_bus,
            view,
        })
    }

    /// Establish the session. Submitted once at startup by the binary.
    pub fn connect(&self, credentials: Credentials) {
        self.session_bus.submit(ServiceEvent::Connect {
            credentials,
            reconnect: false,
        });
    }

    pub fn disconnect(&self) {
        self.session_bus.submit(ServiceEvent::Disconnect);
    }

    /// Hand a typed line to the presenter, which forwards it to the session.
    pub fn submit_input(&self, text: impl Into<String>) {
        self.presenter_bus.submit(UiEvent::Input(text.into()));
    }

    pub fn view(&self) -> Arc<View> {
        Arc::clone(&self.view)
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_running(&self) -> bool {
        self.session_bus.is_running() && self.presenter_bus.is_running()
    }

    /// Cancel the token and join both dispatch threads.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.shutdown.cancel();
        self.presenter_bus.stop();
        self.session_bus.stop();
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.stop();
    }
}
