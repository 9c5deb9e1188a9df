use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Receive timeout used by every worker loop so the running flag is
/// re-checked promptly.
pub const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_millis(100);
/// Send timeout for intra-pipeline pushes; a miss is logged and the item
/// dropped unless the caller retries.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_millis(10);

/// Error returned when enqueuing fails; the value is handed back.
#[derive(Debug, PartialEq, Eq)]
pub enum SendError<T> {
    Timeout { value: T, timeout: Duration },
    Closed(T),
}

impl<T> SendError<T> {
    /// Recovers the value that failed to enqueue.
    pub fn into_inner(self) -> T {
        match self {
            SendError::Timeout { value, .. } => value,
            SendError::Closed(value) => value,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecvError {
    #[error("receive timed out")]
    Timeout,
    #[error("queue closed and drained")]
    Closed,
}

struct QueueState<T> {
    buffer: VecDeque<T>,
    closed: bool,
}

/// Bounded FIFO connecting two pipeline stages. Both directions block with
/// a deadline: `send` waits for space, `recv` waits for an item. After
/// `close`, sends fail immediately and receivers drain what remains.
pub struct BoundedQueue<T> {
    capacity: usize,
    state: Mutex<QueueState<T>>,
    cv: Condvar,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Arc<Self> {
        assert!(capacity > 0, "queue capacity must be nonzero");
        Arc::new(Self {
            capacity,
            state: Mutex::new(QueueState {
                buffer: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            cv: Condvar::new(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn send(&self, value: T, timeout: Duration) -> Result<(), SendError<T>> {
        let deadline = Instant::now() + timeout;
        let mut guard = self.state.lock().unwrap();
        loop {
            if guard.closed {
                return Err(SendError::Closed(value));
            }
            if guard.buffer.len() < self.capacity {
                guard.buffer.push_back(value);
                self.cv.notify_all();
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(SendError::Timeout { value, timeout });
            }
            let (next, _) = self.cv.wait_timeout(guard, deadline - now).unwrap();
            guard = next;
        }
    }

    pub fn recv(&self, timeout: Duration) -> Result<T, RecvError> {
        let deadline = Instant::now() + timeout;
        let mut guard = self.state.lock().unwrap();
        loop {
            if let Some(value) = guard.buffer.pop_front() {
                self.cv.notify_all();
                return Ok(value);
            }
            if guard.closed {
                return Err(RecvError::Closed);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(RecvError::Timeout);
            }
            let (next, _) = self.cv.wait_timeout(guard, deadline - now).unwrap();
            guard = next;
        }
    }

    /// Marks the queue closed. Pending items stay receivable; new sends fail.
    pub fn close(&self) {
        let mut guard = self.state.lock().unwrap();
        guard.closed = true;
        self.cv.notify_all();
    }
}
