//! Monitor channel from a backend to its controller.
//!
//! The channel is the path through which a backend reports mode changes and
//! self-detected failures without the controller polling. It is:
//! - single producer (the backend) and single consumer (the controller)
//! - bounded; when full, the **oldest** event is dropped
//! - ordered in emission order
//! - non-blocking for the producer, so slow consumption never stalls I/O
//!
//! Drops are reported to the consumer as one [`MonitorEvent::Lagged`] ahead
//! of the next surviving event. Delivery is best effort: a controller that
//! suspects missed events should fall back to `ping_response`.
//!
//! # Usage
//!
//! ```rust
//! use blockrep_backend::{monitor, MonitorEvent};
//!
//! let (tx, rx) = monitor::channel(2);
//! tx.emit(MonitorEvent::Failed { reason: "a".into() });
//! tx.emit(MonitorEvent::Failed { reason: "b".into() });
//! tx.emit(MonitorEvent::Failed { reason: "c".into() });
//!
//! assert_eq!(rx.try_recv().unwrap(), MonitorEvent::Lagged { dropped: 1 });
//! assert_eq!(rx.try_recv().unwrap(), MonitorEvent::Failed { reason: "b".into() });
//! ```

use crate::mode::ReplicaMode;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::mpsc::{RecvTimeoutError, TryRecvError};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// An event emitted by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorEvent {
    /// The replica mode changed.
    ModeChanged {
        /// Previous mode.
        from: ReplicaMode,
        /// New mode.
        to: ReplicaMode,
    },
    /// The backend detected a failure of its medium.
    Failed {
        /// What failed.
        reason: String,
    },
    /// Events were dropped because the consumer fell behind.
    Lagged {
        /// Number of dropped events.
        dropped: u64,
    },
}

#[derive(Debug)]
struct Queue {
    events: VecDeque<MonitorEvent>,
    capacity: usize,
    dropped: u64,
    closed: bool,
    receiver_alive: bool,
}

impl Queue {
    fn next(&mut self) -> Option<MonitorEvent> {
        if self.dropped > 0 {
            let dropped = std::mem::take(&mut self.dropped);
            return Some(MonitorEvent::Lagged { dropped });
        }
        self.events.pop_front()
    }
}

#[derive(Debug)]
struct Shared {
    queue: Mutex<Queue>,
    ready: Condvar,
}

/// Creates a monitor channel buffering up to `capacity` events.
#[must_use]
pub fn channel(capacity: usize) -> (MonitorSender, MonitorReceiver) {
    let shared = Arc::new(Shared {
        queue: Mutex::new(Queue {
            events: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
            dropped: 0,
            closed: false,
            receiver_alive: true,
        }),
        ready: Condvar::new(),
    });
    (
        MonitorSender {
            shared: Arc::clone(&shared),
        },
        MonitorReceiver { shared },
    )
}

/// The producing half, owned by the backend.
#[derive(Debug)]
pub struct MonitorSender {
    shared: Arc<Shared>,
}

impl MonitorSender {
    /// Emits an event without blocking.
    ///
    /// Returns false if the channel is closed or the receiver is gone.
    pub fn emit(&self, event: MonitorEvent) -> bool {
        let mut queue = self.shared.queue.lock();
        if queue.closed || !queue.receiver_alive {
            return false;
        }

        if queue.events.len() >= queue.capacity {
            queue.events.pop_front();
            queue.dropped += 1;
        }
        queue.events.push_back(event);
        drop(queue);

        self.shared.ready.notify_one();
        true
    }

    /// Closes the channel. Buffered events stay readable.
    pub fn close(&self) {
        self.shared.queue.lock().closed = true;
        self.shared.ready.notify_all();
    }

    /// Returns true once the channel is closed.
    pub fn is_closed(&self) -> bool {
        self.shared.queue.lock().closed
    }
}

impl Drop for MonitorSender {
    fn drop(&mut self) {
        self.close();
    }
}

/// The consuming half, handed to the controller.
#[derive(Debug)]
pub struct MonitorReceiver {
    shared: Arc<Shared>,
}

impl MonitorReceiver {
    /// Returns the next event without blocking.
    pub fn try_recv(&self) -> Result<MonitorEvent, TryRecvError> {
        let mut queue = self.shared.queue.lock();
        match queue.next() {
            Some(event) => Ok(event),
            None if queue.closed => Err(TryRecvError::Disconnected),
            None => Err(TryRecvError::Empty),
        }
    }

    /// Blocks until an event arrives. Returns `None` once the channel is
    /// closed and drained.
    pub fn recv(&self) -> Option<MonitorEvent> {
        let mut queue = self.shared.queue.lock();
        loop {
            if let Some(event) = queue.next() {
                return Some(event);
            }
            if queue.closed {
                return None;
            }
            self.shared.ready.wait(&mut queue);
        }
    }

    /// Blocks for at most `timeout` waiting for an event.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<MonitorEvent, RecvTimeoutError> {
        let deadline = Instant::now() + timeout;
        let mut queue = self.shared.queue.lock();
        loop {
            if let Some(event) = queue.next() {
                return Ok(event);
            }
            if queue.closed {
                return Err(RecvTimeoutError::Disconnected);
            }
            if self.shared.ready.wait_until(&mut queue, deadline).timed_out() {
                return queue.next().ok_or(RecvTimeoutError::Timeout);
            }
        }
    }

    /// Drains every event currently buffered without blocking.
    pub fn try_iter(&self) -> impl Iterator<Item = MonitorEvent> + '_ {
        std::iter::from_fn(move || self.try_recv().ok())
    }

    /// Blocks on each event until the channel is closed and drained.
    pub fn iter(&self) -> impl Iterator<Item = MonitorEvent> + '_ {
        std::iter::from_fn(move || self.recv())
    }

    /// Returns true if the channel is closed and nothing is left to read.
    pub fn is_closed(&self) -> bool {
        let queue = self.shared.queue.lock();
        queue.closed && queue.events.is_empty() && queue.dropped == 0
    }
}

impl Drop for MonitorReceiver {
    fn drop(&mut self) {
        let mut queue = self.shared.queue.lock();
        queue.receiver_alive = false;
        queue.events.clear();
    }
}
