//! Thread-safe FIFO with a timed blocking pop.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Unbounded multi-producer FIFO queue.
///
/// `push` never blocks and never drops. `pop` waits up to a timeout for an
/// item and returns `None` when none arrived; a timeout is not an error.
#[derive(Debug)]
pub struct BlockingQueue<T> {
    items: Mutex<VecDeque<T>>,
    filled: Condvar,
}

impl<T> BlockingQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            filled: Condvar::new(),
        }
    }

    /// Append an item and wake one waiting consumer.
    pub fn push(&self, item: T) {
        let mut items = self.items.lock();
        items.push_back(item);
        self.filled.notify_one();
    }

    /// Remove the head item, waiting up to `timeout` for one to arrive.
    pub fn pop(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut items = self.items.lock();
        loop {
            if let Some(item) = items.pop_front() {
                return Some(item);
            }
            // Spurious wakeups and lost races with other consumers land here
            // again; only the deadline ends the wait.
            if self.filled.wait_until(&mut items, deadline).timed_out() {
                return items.pop_front();
            }
        }
    }

    /// Remove the head item without waiting.
    pub fn try_pop(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
