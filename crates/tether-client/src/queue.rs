//! Bounded FIFO of outbound messages produced while disconnected.
//!
//! Overflow policy is drop-oldest: the newest application intent is the one
//! most likely to still matter when the connection comes back. A message is
//! removed only after the transport accepts its write.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use tether_core::{Frame, MessageId, TetherError};

use crate::transport::Transport;

/// An outbound message waiting for a connection.
#[derive(Clone, Debug, PartialEq)]
pub struct QueuedMessage {
    /// Unique ID.
    pub id: MessageId,
    /// The frame to write.
    pub frame: Frame,
    /// When it was queued.
    pub enqueued_at: DateTime<Utc>,
    /// Write attempts made so far.
    pub attempts: u32,
}

impl QueuedMessage {
    fn new(frame: Frame) -> Self {
        Self {
            id: MessageId::new(),
            frame,
            enqueued_at: Utc::now(),
            attempts: 0,
        }
    }
}

/// Bounded drop-oldest FIFO.
#[derive(Debug)]
pub struct MessageQueue {
    items: VecDeque<QueuedMessage>,
    capacity: usize,
    dropped_total: u64,
}

impl MessageQueue {
    /// Queue holding at most `capacity` messages (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            dropped_total: 0,
        }
    }

    /// Append a frame. Returns the evicted message if the queue was full.
    pub fn enqueue(&mut self, frame: Frame) -> Option<QueuedMessage> {
        let evicted = if self.items.len() >= self.capacity {
            self.dropped_total += 1;
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(QueuedMessage::new(frame));
        evicted
    }

    /// Write queued messages in order until the queue is empty or a write
    /// fails. Returns how many were written.
    ///
    /// On failure the failed message and everything after it stay queued.
    pub fn drain_into(&mut self, transport: &mut dyn Transport) -> Result<usize, TetherError> {
        let mut written = 0;
        while let Some(front) = self.items.front_mut() {
            front.attempts += 1;
            transport.send(&front.frame)?;
            let _ = self.items.pop_front();
            written += 1;
        }
        Ok(written)
    }

    /// Number of queued messages.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Maximum number of messages held.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Messages evicted by overflow since creation.
    pub fn dropped_total(&self) -> u64 {
        self.dropped_total
    }

    /// Iterate oldest-first.
    pub fn iter(&self) -> impl Iterator<Item = &QueuedMessage> {
        self.items.iter()
    }

    /// Drop everything. Returns how many messages were discarded.
    pub fn clear(&mut self) -> usize {
        let n = self.items.len();
        self.items.clear();
        n
    }
}
