//! The hand-off queue between polling workers and the draining caller.
//!
//! Workers publish one message at a time with a bounded-wait
//! [`offer`](HandOffQueue::offer); the caller takes everything at once with
//! [`drain`](HandOffQueue::drain). The trait is the seam for substituting a
//! different buffering policy without touching worker logic.

use crate::model::Message;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;

/// A thread-safe FIFO shared by all workers.
#[async_trait]
pub trait HandOffQueue: Send + Sync + 'static {
    /// Appends `message`, waiting at most `wait` for room.
    ///
    /// Gives the message back if there was still no room when `wait` elapsed,
    /// so the caller can decide whether to retry.
    async fn offer(&self, message: Message, wait: Duration) -> Result<(), Message>;

    /// Removes and returns every queued message in enqueue order.
    fn drain(&self) -> Vec<Message>;

    /// Number of messages currently queued.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// [`HandOffQueue`] backed by a mutex-guarded `VecDeque`.
///
/// Unbounded by default, in which case every offer succeeds immediately.
/// With a capacity, offers wait for a drain to make room, which gives
/// producers real backpressure.
#[derive(Debug, Default)]
pub struct MessageQueue {
    items: Mutex<VecDeque<Message>>,
    capacity: Option<usize>,
    space: Notify,
}

impl MessageQueue {
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// A queue holding at most `capacity` messages (at least one).
    pub fn bounded(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity.max(1)),
            ..Self::default()
        }
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Pushes if there is room; otherwise hands the message back.
    fn try_push(&self, message: Message) -> Result<(), Message> {
        let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        match self.capacity {
            Some(cap) if items.len() >= cap => Err(message),
            _ => {
                items.push_back(message);
                Ok(())
            }
        }
    }
}

#[async_trait]
impl HandOffQueue for MessageQueue {
    async fn offer(&self, message: Message, wait: Duration) -> Result<(), Message> {
        let deadline = tokio::time::Instant::now() + wait;
        let mut message = message;

        loop {
            // Register for wakeups before checking, so a drain between the
            // check and the await is not missed.
            let notified = self.space.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_push(message) {
                Ok(()) => return Ok(()),
                Err(back) => message = back,
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.try_push(message);
            }
        }
    }

    fn drain(&self) -> Vec<Message> {
        let drained: Vec<Message> = {
            let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *items).into()
        };
        if !drained.is_empty() && self.capacity.is_some() {
            self.space.notify_waiters();
        }
        drained
    }

    fn len(&self) -> usize {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
