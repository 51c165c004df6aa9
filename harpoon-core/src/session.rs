//! Connection lifecycle for one chat session.
//!
//! [`ChatSession`] is the [`Dispatch`] target of the service-bound bus. Its
//! state is owned by that bus's dispatch thread; the only state shared with
//! other threads is the active link slot, which the transport's `on_open`
//! callback fills. Keepalive pings and delayed reconnects run as tasks on
//! one timer runtime owned by the session.
//!
//! Every connection attempt gets a number. Transport callbacks report back
//! as [`ServiceEvent::Connected`] / [`ServiceEvent::Disconnected`] tagged
//! with that number, and notifications from superseded attempts are dropped.
//! Whether a close was deliberate is decided by the phase the session is in
//! when the close is dispatched, never by a flag the callbacks race on.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::{Handle, Runtime};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bus::{BusSender, Dispatch};
use crate::codec::{self, Command};
use crate::error::TransportError;
use crate::event::{ChatMessage, Credentials, ServiceEvent, UiEvent};
use crate::transport::{LinkId, Transport, TransportHandler};

/// Backoff between automatic reconnect attempts.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect after a drop. Zero resubmits at once.
    pub initial_delay: Duration,
    /// Upper bound for the delay.
    pub max_delay: Duration,
    /// Multiplier applied after each consecutive failed attempt.
    pub backoff_factor: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Idle time between keepalive pings.
    pub keepalive_interval: Duration,
    pub reconnect: ReconnectConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            keepalive_interval: Duration::from_secs(60),
            reconnect: ReconnectConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
}

struct ActiveLink {
    attempt: u64,
    link: LinkId,
    keepalive: CancellationToken,
    task: JoinHandle<()>,
}

/// The attempt the session currently wants, and its link once open.
#[derive(Default)]
struct LinkSlot {
    wanted: u64,
    active: Option<ActiveLink>,
}

/// The service-bound dispatch target: connect, reconnect, keepalive, send.
pub struct ChatSession {
    transport: Arc<dyn Transport>,
    config: SessionConfig,
    ui: BusSender<UiEvent>,
    commands: BusSender<ServiceEvent>,
    shutdown: CancellationToken,

    phase: Phase,
    credentials: Option<Credentials>,
    /// Set by `Disconnect`, cleared by a user-issued `Connect`. Queued
    /// reconnects are discarded while set.
    deliberate: bool,
    attempt: u64,
    backoff: Duration,
    pending_reconnect: Option<CancellationToken>,
    slot: Arc<Mutex<LinkSlot>>,
    runtime: Option<Runtime>,
    timers: Handle,
}

impl ChatSession {
    /// `commands` must feed the bus this session is dispatched from; the
    /// session posts its own transport notifications and reconnects there.
    ///
    /// Fails only when the timer runtime cannot be started.
    pub fn new(
        transport: Arc<dyn Transport>,
        config: SessionConfig,
        ui: BusSender<UiEvent>,
        commands: BusSender<ServiceEvent>,
        shutdown: CancellationToken,
    ) -> io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("harpoon-timer")
            .enable_time()
            .build()?;
        let timers = runtime.handle().clone();
        let backoff = config.reconnect.initial_delay;
        Ok(Self {
            transport,
            config,
            ui,
            commands,
            shutdown,
            phase: Phase::Idle,
            credentials: None,
            deliberate: false,
            attempt: 0,
            backoff,
            pending_reconnect: None,
            slot: Arc::new(Mutex::new(LinkSlot::default())),
            runtime: Some(runtime),
            timers,
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Number of the most recent connection attempt (0 before the first).
    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Delay the next automatic reconnect will wait.
    pub fn next_backoff(&self) -> Duration {
        self.backoff
    }

    fn server(&self) -> &str {
        self.credentials
            .as_ref()
            .map_or("server", |c| c.server_uri.as_str())
    }

    fn status(&self, body: impl Into<String>) {
        self.ui.submit(UiEvent::status(body));
    }

    fn handle_connect(&mut self, credentials: &Credentials, reconnect: bool) {
        if self.shutdown.is_cancelled() {
            return;
        }
        if reconnect {
            if self.deliberate {
                tracing::debug!("dropping queued reconnect after deliberate disconnect");
                return;
            }
            self.pending_reconnect = None;
        } else {
            self.deliberate = false;
            self.backoff = self.config.reconnect.initial_delay;
            if let Some(pending) = self.pending_reconnect.take() {
                pending.cancel();
            }
        }

        self.release_link();
        self.attempt += 1;
        self.slot.lock().wanted = self.attempt;
        self.credentials = Some(credentials.clone());
        self.phase = Phase::Connecting;
        self.status(format!("connecting to {}", credentials.server_uri));
        tracing::info!(
            attempt = self.attempt,
            server = %credentials.server_uri,
            channel = %credentials.channel,
            reconnect,
            "connecting"
        );

        let callbacks = Arc::new(AttemptCallbacks {
            attempt: self.attempt,
            server: credentials.server_uri.clone(),
            join: Command::join(&credentials.channel, &credentials.username, &credentials.password)
                .encode(),
            keepalive_interval: self.config.keepalive_interval,
            transport: Arc::clone(&self.transport),
            ui: self.ui.clone(),
            commands: self.commands.clone(),
            shutdown: self.shutdown.clone(),
            slot: Arc::clone(&self.slot),
            timers: self.timers.clone(),
        });
        if let Err(e) = self.transport.connect(&credentials.server_uri, callbacks) {
            tracing::warn!(error = %e, "connect rejected");
            self.status(format!("failed to connect: {e}"));
            self.slot.lock().wanted = 0;
            self.phase = Phase::Disconnected;
        }
    }

    fn handle_connected(&mut self, attempt: u64) {
        if attempt != self.attempt {
            tracing::debug!(attempt, current = self.attempt, "ignoring stale open");
            return;
        }
        match self.phase {
            Phase::Connecting => {
                self.phase = Phase::Connected;
                self.backoff = self.config.reconnect.initial_delay;
                tracing::info!(attempt, "session connected");
            }
            // A disconnect raced the handshake; make sure the link goes away.
            Phase::Disconnecting => self.release_link(),
            other => tracing::debug!(attempt, phase = ?other, "open in unexpected phase"),
        }
    }

    fn handle_disconnect(&mut self) {
        self.deliberate = true;
        if let Some(pending) = self.pending_reconnect.take() {
            pending.cancel();
        }
        let server = self.server().to_string();
        match self.phase {
            Phase::Connecting | Phase::Connected => {
                self.status(format!("disconnecting from {server}"));
                self.phase = Phase::Disconnecting;
                self.release_link();
            }
            Phase::Disconnecting => {}
            Phase::Idle | Phase::Disconnected => {
                self.status(format!("disconnecting from {server}"));
                self.status(format!("disconnected from {server}"));
                self.phase = Phase::Disconnected;
            }
        }
    }

    fn handle_disconnected(&mut self, attempt: u64) {
        if attempt != self.attempt {
            tracing::debug!(attempt, current = self.attempt, "ignoring stale close");
            return;
        }
        self.release_link();
        let server = self.server().to_string();
        match self.phase {
            Phase::Connecting | Phase::Connected => {
                tracing::info!(attempt, "connection dropped");
                self.status(format!("reconnecting to {server}"));
                self.phase = Phase::Disconnected;
                self.schedule_reconnect();
            }
            Phase::Disconnecting => {
                tracing::info!(attempt, "session disconnected");
                self.status(format!("disconnected from {server}"));
                self.phase = Phase::Disconnected;
            }
            Phase::Idle | Phase::Disconnected => {
                tracing::debug!(attempt, "close already handled");
            }
        }
    }

    fn handle_send(&mut self, text: &str) {
        if text.trim().is_empty() {
            return;
        }
        let link = self.slot.lock().active.as_ref().map(|a| a.link);
        let Some(link) = link else {
            self.status("not connected; message not sent");
            return;
        };
        let frame = Command::Chat {
            text: text.to_string(),
        }
        .encode();
        if let Err(e) = self.transport.send(link, &frame) {
            tracing::warn!(error = %e, "chat send failed");
            self.status(format!("failed to send message: {e}"));
        }
    }

    fn schedule_reconnect(&mut self) {
        let Some(credentials) = self.credentials.clone() else {
            return;
        };
        let delay = self.backoff;
        let reconnect = &self.config.reconnect;
        self.backoff = delay
            .mul_f64(reconnect.backoff_factor)
            .min(reconnect.max_delay);
        let event = ServiceEvent::Connect {
            credentials,
            reconnect: true,
        };
        if delay.is_zero() {
            self.commands.submit(event);
            return;
        }

        tracing::debug!(?delay, "reconnect scheduled");
        let cancel = self.shutdown.child_token();
        self.pending_reconnect = Some(cancel.clone());
        let commands = self.commands.clone();
        self.timers.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => commands.submit(event),
            }
        });
    }

    /// Stop the keepalive, close the link and forget it.
    fn release_link(&mut self) {
        let active = {
            let mut slot = self.slot.lock();
            slot.wanted = 0;
            slot.active.take()
        };
        if let Some(active) = active {
            tracing::debug!(attempt = active.attempt, link = %active.link, "releasing link");
            active.keepalive.cancel();
            self.transport.close(active.link);
            // No ping may follow the release.
            if let Err(e) = self.timers.block_on(active.task)
                && e.is_panic()
            {
                tracing::error!("keepalive task panicked");
            }
        }
    }
}

impl Dispatch<ServiceEvent> for ChatSession {
    fn dispatch(&mut self, event: &ServiceEvent) {
        match event {
            ServiceEvent::SendMessage(text) => self.handle_send(text),
            ServiceEvent::Connect {
                credentials,
                reconnect,
            } => self.handle_connect(credentials, *reconnect),
            ServiceEvent::Disconnect => self.handle_disconnect(),
            ServiceEvent::Connected { attempt } => self.handle_connected(*attempt),
            ServiceEvent::Disconnected { attempt } => self.handle_disconnected(*attempt),
        }
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        if let Some(pending) = self.pending_reconnect.take() {
            pending.cancel();
        }
        self.release_link();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// Transport callbacks for one connection attempt.
struct AttemptCallbacks {
    attempt: u64,
    server: String,
    join: String,
    keepalive_interval: Duration,
    transport: Arc<dyn Transport>,
    ui: BusSender<UiEvent>,
    commands: BusSender<ServiceEvent>,
    shutdown: CancellationToken,
    slot: Arc<Mutex<LinkSlot>>,
    timers: Handle,
}

impl AttemptCallbacks {
    fn is_wanted(&self) -> bool {
        self.slot.lock().wanted == self.attempt
    }
}

impl TransportHandler for AttemptCallbacks {
    fn on_open(&self, link: LinkId) {
        let mut slot = self.slot.lock();
        if slot.wanted != self.attempt {
            drop(slot);
            tracing::debug!(attempt = self.attempt, %link, "closing link of superseded attempt");
            self.transport.close(link);
            return;
        }

        self.ui.submit(UiEvent::status(format!("connected to {}", self.server)));
        if let Err(e) = self.transport.send(link, &self.join) {
            tracing::warn!(error = %e, "join send failed");
            self.ui
                .submit(UiEvent::status(format!("failed to send join: {e}")));
        }

        let keepalive = self.shutdown.child_token();
        let task = self.timers.spawn(run_keepalive(
            Arc::clone(&self.transport),
            link,
            self.keepalive_interval,
            keepalive.clone(),
        ));
        slot.active = Some(ActiveLink {
            attempt: self.attempt,
            link,
            keepalive,
            task,
        });
        drop(slot);

        self.commands.submit(ServiceEvent::Connected {
            attempt: self.attempt,
        });
    }

    fn on_message(&self, payload: String) {
        if !self.is_wanted() {
            return;
        }
        match codec::parse(&payload) {
            Ok(events) => {
                for event in events {
                    self.ui.submit(event);
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "dropping unparseable payload");
                self.ui
                    .submit(UiEvent::ChatMessage(ChatMessage::parse_failure(&payload, &e)));
            }
        }
    }

    fn on_fail(&self, error: &TransportError) {
        if !self.is_wanted() {
            return;
        }
        self.ui
            .submit(UiEvent::status(format!("connection error: {error}")));
    }

    fn on_close(&self) {
        {
            let slot = self.slot.lock();
            if let Some(active) = slot.active.as_ref().filter(|a| a.attempt == self.attempt) {
                active.keepalive.cancel();
            }
        }
        self.commands.submit(ServiceEvent::Disconnected {
            attempt: self.attempt,
        });
    }
}

/// Ping `link` every `interval` until `stop` fires.
async fn run_keepalive(
    transport: Arc<dyn Transport>,
    link: LinkId,
    interval: Duration,
    stop: CancellationToken,
) {
    let ping = Command::Ping.encode();
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = tokio::time::sleep(interval) => {
                if let Err(e) = transport.send(link, &ping) {
                    tracing::debug!(%link, error = %e, "keepalive ping not sent");
                }
            }
        }
    }
    tracing::debug!(%link, "keepalive stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    use crate::event::{MessageKind, PARSE_ERROR_SENDER, RosterChange};
    use crate::queue::BlockingQueue;
    use crate::testing::ScriptedTransport;

    struct Rig {
        transport: Arc<ScriptedTransport>,
        ui: Arc<BlockingQueue<UiEvent>>,
        commands: Arc<BlockingQueue<ServiceEvent>>,
        shutdown: CancellationToken,
        session: ChatSession,
    }

    fn instant_reconnect() -> SessionConfig {
        SessionConfig {
            keepalive_interval: Duration::from_secs(60),
            reconnect: ReconnectConfig {
                initial_delay: Duration::ZERO,
                max_delay: Duration::from_secs(1),
                backoff_factor: 2.0,
            },
        }
    }

    fn credentials() -> Credentials {
        Credentials {
            server_uri: "wss://x".into(),
            channel: "general".into(),
            username: "alice".into(),
            password: String::new(),
        }
    }

    impl Rig {
        fn new(config: SessionConfig) -> Self {
            let transport = ScriptedTransport::new();
            let ui = Arc::new(BlockingQueue::new());
            let commands = Arc::new(BlockingQueue::new());
            let shutdown = CancellationToken::new();
            let session = ChatSession::new(
                transport.clone(),
                config,
                BusSender::from(Arc::clone(&ui)),
                BusSender::from(Arc::clone(&commands)),
                shutdown.clone(),
            )
            .unwrap();
            Self {
                transport,
                ui,
                commands,
                shutdown,
                session,
            }
        }

        fn connect(&mut self) {
            self.session.dispatch(&ServiceEvent::Connect {
                credentials: credentials(),
                reconnect: false,
            });
        }

        /// Connect and complete the handshake on link 1.
        fn connected(config: SessionConfig) -> Self {
            let mut rig = Self::new(config);
            rig.connect();
            rig.transport.open(LinkId(1));
            rig.pump();
            rig.drain_ui();
            rig
        }

        /// Dispatch what the callbacks queued, as the bus thread would.
        fn pump(&mut self) {
            while let Some(event) = self.commands.try_pop() {
                self.session.dispatch(&event);
            }
        }

        /// Dispatch exactly the next queued service event.
        fn step(&mut self) -> ServiceEvent {
            let event = self.commands.try_pop().expect("a queued service event");
            self.session.dispatch(&event);
            event
        }

        fn drain_ui(&self) -> Vec<UiEvent> {
            std::iter::from_fn(|| self.ui.try_pop()).collect()
        }

        fn drain_commands(&self) -> Vec<ServiceEvent> {
            std::iter::from_fn(|| self.commands.try_pop()).collect()
        }

        fn statuses(&self) -> Vec<String> {
            self.drain_ui()
                .into_iter()
                .filter_map(|event| match event {
                    UiEvent::ChatMessage(msg) if msg.kind == MessageKind::Status => Some(msg.body),
                    _ => None,
                })
                .collect()
        }
    }

    #[test]
    fn connect_then_open_reports_in_order_and_joins() {
        let mut rig = Rig::new(instant_reconnect());
        rig.connect();
        assert_eq!(rig.session.phase(), Phase::Connecting);
        assert_eq!(rig.transport.connects(), vec!["wss://x"]);

        rig.transport.open(LinkId(1));
        rig.transport.deliver(r#"{"cmd":"chat","nick":"bob","text":"hey"}"#);
        rig.pump();
        assert_eq!(rig.session.phase(), Phase::Connected);

        let events = rig.drain_ui();
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], UiEvent::ChatMessage(m) if m.kind == MessageKind::Status && m.body == "connecting to wss://x"));
        assert!(matches!(&events[1], UiEvent::ChatMessage(m) if m.kind == MessageKind::Status && m.body == "connected to wss://x"));
        assert!(matches!(&events[2], UiEvent::ChatMessage(m) if m.sender == "bob" && m.body == "hey"));

        let sent = rig.transport.sent();
        assert_eq!(sent.len(), 1);
        let join: serde_json::Value = serde_json::from_str(&sent[0].1).unwrap();
        assert_eq!(join["cmd"], "join");
        assert_eq!(join["channel"], "general");
        assert_eq!(join["nick"], "alice");
    }

    #[test]
    fn fan_out_keeps_classification_order() {
        let rig = Rig::connected(instant_reconnect());
        rig.transport.deliver(r#"{"cmd":"onlineAdd","nick":"bob"}"#);
        rig.transport.deliver(r#"{"cmd":"onlineRemove","nick":"bob"}"#);
        let events = rig.drain_ui();
        assert_eq!(events.len(), 4);
        assert!(matches!(&events[0], UiEvent::UserDelta { change: RosterChange::Add, .. }));
        assert!(matches!(&events[1], UiEvent::ChatMessage(m) if m.body == "bob has joined the channel"));
        assert!(matches!(&events[2], UiEvent::ChatMessage(m) if m.body == "bob has left the channel"));
        assert!(matches!(&events[3], UiEvent::UserDelta { change: RosterChange::Remove, .. }));
    }

    #[test]
    fn unexpected_close_resubmits_connect_exactly_once() {
        let mut rig = Rig::connected(instant_reconnect());
        rig.transport.drop_link(LinkId(1));

        assert_eq!(rig.step(), ServiceEvent::Disconnected { attempt: 1 });
        assert_eq!(rig.session.phase(), Phase::Disconnected);

        let queued = rig.drain_commands();
        assert_eq!(
            queued,
            vec![ServiceEvent::Connect {
                credentials: credentials(),
                reconnect: true
            }]
        );
        let statuses = rig.statuses();
        assert_eq!(
            statuses.iter().filter(|s| s.starts_with("reconnecting")).count(),
            1
        );

        rig.session.dispatch(&queued[0]);
        assert_eq!(rig.transport.connects().len(), 2);
        assert_eq!(rig.session.phase(), Phase::Connecting);
        assert_eq!(rig.session.attempt(), 2);
    }

    #[test]
    fn deliberate_disconnect_does_not_reconnect() {
        let mut rig = Rig::connected(instant_reconnect());
        rig.session.dispatch(&ServiceEvent::Disconnect);
        assert_eq!(rig.session.phase(), Phase::Disconnecting);
        assert_eq!(rig.transport.closed(), vec![LinkId(1)]);

        rig.transport.finish();
        rig.pump();
        assert_eq!(rig.session.phase(), Phase::Disconnected);
        assert_eq!(
            rig.statuses(),
            vec!["disconnecting from wss://x", "disconnected from wss://x"]
        );
        assert!(rig.drain_commands().is_empty());
        assert_eq!(rig.transport.connects().len(), 1);
    }

    #[test]
    fn disconnect_during_handshake_closes_the_late_link() {
        let mut rig = Rig::new(instant_reconnect());
        rig.connect();
        rig.session.dispatch(&ServiceEvent::Disconnect);
        rig.transport.open(LinkId(1));
        assert_eq!(rig.transport.closed(), vec![LinkId(1)]);
        assert!(rig.transport.sent().is_empty());

        rig.transport.finish();
        rig.pump();
        let statuses = rig.statuses();
        assert!(!statuses.iter().any(|s| s.starts_with("connected")));
        assert_eq!(statuses.last().map(String::as_str), Some("disconnected from wss://x"));
        assert_eq!(rig.session.phase(), Phase::Disconnected);
        assert_eq!(rig.transport.connects().len(), 1);
    }

    #[test]
    fn queued_reconnect_is_dropped_after_disconnect() {
        let mut rig = Rig::connected(instant_reconnect());
        rig.transport.drop_link(LinkId(1));
        rig.step();
        let queued = rig.drain_commands();
        assert_eq!(queued.len(), 1);

        rig.session.dispatch(&ServiceEvent::Disconnect);
        rig.session.dispatch(&queued[0]);
        assert_eq!(rig.transport.connects().len(), 1);
        assert_eq!(rig.session.phase(), Phase::Disconnected);

        // A fresh user connect clears the deliberate flag.
        rig.connect();
        assert_eq!(rig.transport.connects().len(), 2);
    }

    #[test]
    fn close_from_superseded_attempt_is_ignored() {
        let mut rig = Rig::new(instant_reconnect());
        rig.connect();
        rig.connect();
        assert_eq!(rig.session.attempt(), 2);
        rig.drain_ui();

        rig.transport.finish_attempt(0);
        rig.pump();
        assert_eq!(rig.session.phase(), Phase::Connecting);
        assert!(rig.statuses().is_empty());
        assert!(rig.drain_commands().is_empty());
    }

    #[test]
    fn failed_open_is_reported_then_retried() {
        let mut rig = Rig::new(instant_reconnect());
        rig.connect();
        rig.transport.fail("connection refused");
        rig.transport.finish();
        rig.step();
        let statuses = rig.statuses();
        assert_eq!(statuses[0], "connecting to wss://x");
        assert_eq!(statuses[1], "connection error: connection lost: connection refused");
        assert_eq!(statuses[2], "reconnecting to wss://x");
        assert_eq!(rig.drain_commands().len(), 1);
    }

    #[test]
    fn malformed_payload_yields_one_diagnostic() {
        let rig = Rig::connected(instant_reconnect());
        rig.transport.deliver("garbage");
        rig.transport.deliver(r#"{"cmd":"chat","nick":"bob","text":"still here"}"#);
        let events = rig.drain_ui();
        assert_eq!(events.len(), 2);
        match &events[0] {
            UiEvent::ChatMessage(msg) => {
                assert_eq!(msg.sender, PARSE_ERROR_SENDER);
                assert!(msg.body.starts_with("garbage, "));
            }
            other => panic!("expected diagnostic, got {other:?}"),
        }
        assert!(matches!(&events[1], UiEvent::ChatMessage(m) if m.body == "still here"));
    }

    #[test]
    fn send_message_paths() {
        let mut rig = Rig::connected(instant_reconnect());
        rig.session.dispatch(&ServiceEvent::SendMessage("hi all".into()));
        rig.session.dispatch(&ServiceEvent::SendMessage("   ".into()));
        let sent = rig.transport.sent();
        assert_eq!(sent.len(), 2);
        let chat: serde_json::Value = serde_json::from_str(&sent[1].1).unwrap();
        assert_eq!(chat["cmd"], "chat");
        assert_eq!(chat["text"], "hi all");

        rig.session.dispatch(&ServiceEvent::Disconnect);
        rig.drain_ui();
        rig.session.dispatch(&ServiceEvent::SendMessage("anyone?".into()));
        assert_eq!(rig.statuses(), vec!["not connected; message not sent"]);
        assert_eq!(rig.transport.sent().len(), 2);
    }

    #[test]
    fn send_error_is_reported_not_retried() {
        let mut rig = Rig::connected(instant_reconnect());
        // The server vanished but the close has not been dispatched yet.
        rig.transport.close(LinkId(1));
        rig.session.dispatch(&ServiceEvent::SendMessage("hello?".into()));
        let statuses = rig.statuses();
        assert_eq!(statuses.len(), 1);
        assert!(statuses[0].starts_with("failed to send message"));
    }

    #[test]
    fn rejected_connect_reports_and_settles() {
        let mut rig = Rig::new(instant_reconnect());
        rig.transport.refuse_connects();
        rig.connect();
        let statuses = rig.statuses();
        assert_eq!(statuses.len(), 2);
        assert!(statuses[1].starts_with("failed to connect"));
        assert_eq!(rig.session.phase(), Phase::Disconnected);
        assert!(rig.drain_commands().is_empty());
    }

    #[test]
    fn backoff_grows_to_the_cap_and_resets_on_open() {
        let config = SessionConfig {
            keepalive_interval: Duration::from_secs(60),
            reconnect: ReconnectConfig {
                initial_delay: Duration::from_millis(40),
                max_delay: Duration::from_millis(100),
                backoff_factor: 2.0,
            },
        };
        let mut rig = Rig::connected(config);
        rig.transport.drop_link(LinkId(1));
        rig.step();
        assert_eq!(rig.session.next_backoff(), Duration::from_millis(80));
        assert!(rig.commands.try_pop().is_none());

        let reconnect = rig.commands.pop(Duration::from_secs(5)).expect("delayed reconnect");
        assert!(matches!(reconnect, ServiceEvent::Connect { reconnect: true, .. }));
        rig.session.dispatch(&reconnect);

        rig.transport.finish();
        rig.step();
        assert_eq!(rig.session.next_backoff(), Duration::from_millis(100));

        let reconnect = rig.commands.pop(Duration::from_secs(5)).expect("second reconnect");
        rig.session.dispatch(&reconnect);
        rig.transport.open(LinkId(3));
        rig.pump();
        assert_eq!(rig.session.phase(), Phase::Connected);
        assert_eq!(rig.session.next_backoff(), Duration::from_millis(40));
    }

    #[test]
    fn disconnect_cancels_pending_reconnect() {
        let config = SessionConfig {
            keepalive_interval: Duration::from_secs(60),
            reconnect: ReconnectConfig {
                initial_delay: Duration::from_millis(100),
                ..ReconnectConfig::default()
            },
        };
        let mut rig = Rig::connected(config);
        rig.transport.drop_link(LinkId(1));
        rig.step();
        rig.session.dispatch(&ServiceEvent::Disconnect);
        assert!(rig.commands.pop(Duration::from_millis(400)).is_none());
        assert_eq!(rig.transport.connects().len(), 1);
    }

    #[test]
    fn keepalive_pings_until_released() {
        let config = SessionConfig {
            keepalive_interval: Duration::from_millis(20),
            ..instant_reconnect()
        };
        let mut rig = Rig::connected(config);
        let deadline = Instant::now() + Duration::from_secs(5);
        while !rig.transport.sent_commands().contains(&"ping".to_string()) {
            assert!(Instant::now() < deadline, "no keepalive ping sent");
            thread::sleep(Duration::from_millis(5));
        }

        rig.session.dispatch(&ServiceEvent::Disconnect);
        let pings = rig.transport.sent_commands().len();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(rig.transport.sent_commands().len(), pings);
    }

    #[test]
    fn process_shutdown_stops_keepalive() {
        let config = SessionConfig {
            keepalive_interval: Duration::from_millis(20),
            ..instant_reconnect()
        };
        let rig = Rig::connected(config);
        let deadline = Instant::now() + Duration::from_secs(5);
        while !rig.transport.sent_commands().contains(&"ping".to_string()) {
            assert!(Instant::now() < deadline, "no keepalive ping sent");
            thread::sleep(Duration::from_millis(5));
        }

        rig.shutdown.cancel();
        // Let a ping already in flight land.
        thread::sleep(Duration::from_millis(50));
        let pings = rig.transport.sent_commands().len();
        thread::sleep(Duration::from_millis(150));
        assert_eq!(rig.transport.sent_commands().len(), pings);
        assert_eq!(rig.session.phase(), Phase::Connected);
    }

    #[test]
    fn process_shutdown_cancels_pending_reconnect() {
        let config = SessionConfig {
            keepalive_interval: Duration::from_secs(60),
            reconnect: ReconnectConfig {
                initial_delay: Duration::from_millis(100),
                ..ReconnectConfig::default()
            },
        };
        let mut rig = Rig::connected(config);
        rig.transport.drop_link(LinkId(1));
        rig.step();
        rig.shutdown.cancel();
        assert!(rig.commands.pop(Duration::from_millis(400)).is_none());
    }
}
