//! Event bus: a [`BlockingQueue`] paired with one dispatch thread.
//!
//! Producers hold a [`BusSender`] and may live on any thread. The dispatch
//! thread pops events in FIFO order and hands each one, by reference, to the
//! single [`Dispatch`] target registered with [`EventBus::start`]. The loop
//! pops with a bounded timeout so it notices the shared cancellation token
//! within one poll interval even when no traffic arrives.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::BusError;
use crate::queue::BlockingQueue;

/// How long a dispatch loop waits for an event before re-checking shutdown.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// A handler target for one event family.
///
/// Implementations match on the event enum and route each variant to the
/// matching handler method. Handlers run on the dispatch thread and must not
/// block indefinitely: they serialize every event of their family.
pub trait Dispatch<E>: Send + 'static {
    fn dispatch(&mut self, event: &E);
}

/// Cloneable, thread-safe submit handle for a bus.
pub struct BusSender<E> {
    queue: Arc<BlockingQueue<E>>,
}

impl<E> BusSender<E> {
    /// Enqueue an event. Ownership moves into the queue.
    pub fn submit(&self, event: E) {
        self.queue.push(event);
    }
}

impl<E> From<Arc<BlockingQueue<E>>> for BusSender<E> {
    fn from(queue: Arc<BlockingQueue<E>>) -> Self {
        Self { queue }
    }
}

impl<E> Clone for BusSender<E> {
    fn clone(&self) -> Self {
        Self {
            queue: Arc::clone(&self.queue),
        }
    }
}

impl<E> std::fmt::Debug for BusSender<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusSender")
            .field("pending", &self.queue.len())
            .finish()
    }
}

/// An event queue plus the thread that drains it.
///
/// The queue exists from construction, so senders can be handed out (and
/// events queued) before the target is built. Dropping the bus cancels the
/// shutdown token and joins the dispatch thread.
pub struct EventBus<E: Send + 'static> {
    name: &'static str,
    queue: Arc<BlockingQueue<E>>,
    shutdown: CancellationToken,
    poll_interval: Duration,
    worker: Option<JoinHandle<()>>,
}

impl<E: Send + 'static> EventBus<E> {
    pub fn new(name: &'static str, shutdown: CancellationToken) -> Self {
        Self {
            name,
            queue: Arc::new(BlockingQueue::new()),
            shutdown,
            poll_interval: DEFAULT_POLL_INTERVAL,
            worker: None,
        }
    }

    /// Override the shutdown poll interval (tests use short intervals).
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn sender(&self) -> BusSender<E> {
        BusSender {
            queue: Arc::clone(&self.queue),
        }
    }

    /// Thread-safe enqueue.
    pub fn submit(&self, event: E) {
        self.queue.push(event);
    }

    /// Number of events waiting to be dispatched.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Spawn the dispatch thread with `target` as the handler.
    pub fn start<T: Dispatch<E>>(&mut self, mut target: T) -> Result<(), BusError> {
        if self.worker.is_some() {
            return Err(BusError::AlreadyStarted(self.name));
        }
        let queue = Arc::clone(&self.queue);
        let shutdown = self.shutdown.clone();
        let poll_interval = self.poll_interval;
        let name = self.name;
        let worker = thread::Builder::new()
            .name(format!("{name}-dispatch"))
            .spawn(move || {
                tracing::debug!(bus = name, "dispatch loop started");
                run(&queue, &mut target, &shutdown, poll_interval);
                tracing::debug!(bus = name, "dispatch loop stopped");
            })
            .map_err(|source| BusError::Spawn { bus: name, source })?;
        self.worker = Some(worker);
        Ok(())
    }

    /// Cancel the shutdown token and wait for the dispatch thread to exit.
    pub fn stop(&mut self) {
        self.shutdown.cancel();
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            tracing::error!(bus = self.name, "dispatch thread panicked");
        }
    }
}

impl<E: Send + 'static> Drop for EventBus<E> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The dispatch loop, run on the calling thread until `shutdown` fires.
///
/// A handler that panics is logged and the loop moves on to the next event.
pub fn run<E, T>(
    queue: &BlockingQueue<E>,
    target: &mut T,
    shutdown: &CancellationToken,
    poll_interval: Duration,
) where
    T: Dispatch<E>,
{
    while !shutdown.is_cancelled() {
        let Some(event) = queue.pop(poll_interval) else {
            continue;
        };
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| target.dispatch(&event)));
        if outcome.is_err() {
            tracing::error!("event handler panicked; event dropped");
        }
    }
}
