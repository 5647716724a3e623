//! Bounded, backpressured FIFO buffers between stages.
//!
//! A producer owns one [`BufferWriter`] per consumer and each consumer owns the
//! matching [`Buffer`]. Fan-out is done by the producer's [`Outlet`], which
//! writes every value to each attached buffer before advancing, so every
//! consumer observes the identical sequence at its own pace.
//!
//! End-of-stream is signalled by dropping (or [closing](Outlet::close)) the
//! writers: a reader's [`generate`](Buffer::generate) sequence ends only once
//! the queue is drained *and* the writer is gone, never on a transient empty
//! queue.

use crate::error::PipelineError;
use crate::signal::StopFlag;
use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Create a buffer of `capacity` items (at least one).
///
/// `poll` bounds how long a blocked `put` or read waits before re-checking its
/// stop flag.
pub fn bounded<T>(capacity: usize, poll: Duration) -> (BufferWriter<T>, Buffer<T>) {
    let capacity = capacity.max(1);
    let (tx, rx) = crossbeam_channel::bounded(capacity);
    (
        BufferWriter { tx, capacity, poll },
        Buffer { rx, capacity, poll },
    )
}

/// Producer half of a buffer.
pub struct BufferWriter<T> {
    tx: Sender<T>,
    capacity: usize,
    poll: Duration,
}

impl<T> BufferWriter<T> {
    /// Enqueue `value`, blocking while the buffer is full.
    ///
    /// Returns [`PipelineError::Cancelled`] if `stop` is raised while blocked and
    /// [`PipelineError::Disconnected`] if the reader was dropped.
    pub fn put(&self, value: T, stop: &StopFlag) -> Result<(), PipelineError> {
        let mut value = value;
        loop {
            match self.tx.send_timeout(value, self.poll) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(back)) => {
                    if stop.is_raised() {
                        return Err(PipelineError::Cancelled);
                    }
                    value = back;
                }
                Err(SendTimeoutError::Disconnected(_)) => return Err(PipelineError::Disconnected),
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tx.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.tx.is_full()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Consumer half of a buffer.
pub struct Buffer<T> {
    rx: Receiver<T>,
    capacity: usize,
    poll: Duration,
}

impl<T> Buffer<T> {
    /// Number of items currently queued (snapshot).
    #[must_use]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.rx.is_full()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Items in arrival order until the producer signalled end-of-stream and the
    /// queue is drained.
    ///
    /// Received items are consumed: a second call continues where the first
    /// one stopped.
    pub fn generate(&self) -> Generate<'_, T> {
        Generate {
            buffer: self,
            stop: None,
            interrupted: false,
        }
    }

    /// Like [`generate`](Self::generate), but also ends as soon as `stop` is raised.
    pub fn generate_until<'a>(&'a self, stop: &'a StopFlag) -> Generate<'a, T> {
        Generate {
            buffer: self,
            stop: Some(stop),
            interrupted: false,
        }
    }
}

/// Lazy sequence returned by [`Buffer::generate`].
pub struct Generate<'a, T> {
    buffer: &'a Buffer<T>,
    stop: Option<&'a StopFlag>,
    interrupted: bool,
}

impl<T> Generate<'_, T> {
    /// Whether the sequence ended because of a stop request rather than end-of-stream.
    #[must_use]
    pub fn interrupted(&self) -> bool {
        self.interrupted
    }
}

impl<T> Iterator for Generate<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        loop {
            if self.interrupted {
                return None;
            }
            if self.stop.is_some_and(StopFlag::is_raised) {
                self.interrupted = true;
                return None;
            }
            match self.buffer.rx.recv_timeout(self.buffer.poll) {
                Ok(value) => return Some(value),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }
}

/// Fan-out set of writers owned by a producer.
pub struct Outlet<T> {
    writers: Mutex<Vec<BufferWriter<T>>>,
    closed: AtomicBool,
    capacity: usize,
    poll: Duration,
}

impl<T: Clone> Outlet<T> {
    #[must_use]
    pub fn new(capacity: usize, poll: Duration) -> Self {
        Self {
            writers: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            capacity,
            poll,
        }
    }

    /// Attach a new consumer. It sees every value published after this call.
    ///
    /// A consumer attached after [`close`](Self::close) sees end-of-stream at once.
    pub fn subscribe(&self) -> Buffer<T> {
        let (writer, reader) = bounded(self.capacity, self.poll);
        let mut writers = self.writers.lock();
        if !self.closed.load(Ordering::Acquire) {
            writers.push(writer);
        }
        reader
    }

    /// Write `value` to every attached buffer, blocking on each full one in turn.
    ///
    /// Writers whose reader went away are dropped; once none are left this
    /// returns [`PipelineError::Disconnected`].
    pub fn publish(&self, value: T, stop: &StopFlag) -> Result<(), PipelineError> {
        let mut writers = self.writers.lock();
        let last = writers
            .len()
            .checked_sub(1)
            .ok_or(PipelineError::Disconnected)?;
        let mut value = Some(value);
        let mut gone = Vec::new();
        for (i, writer) in writers.iter().enumerate() {
            let item = if i == last { value.take() } else { value.clone() };
            let Some(item) = item else { break };
            match writer.put(item, stop) {
                Ok(()) => {}
                Err(PipelineError::Disconnected) => gone.push(i),
                Err(e) => return Err(e),
            }
        }
        for i in gone.into_iter().rev() {
            writers.remove(i);
        }
        if writers.is_empty() {
            Err(PipelineError::Disconnected)
        } else {
            Ok(())
        }
    }

    /// Signal end-of-stream to every consumer.
    pub fn close(&self) {
        let mut writers = self.writers.lock();
        self.closed.store(true, Ordering::Release);
        writers.clear();
    }

    /// Number of attached consumers.
    #[must_use]
    pub fn consumers(&self) -> usize {
        self.writers.lock().len()
    }
}
