#![forbid(unsafe_code)]

//! Ordered buffer of messages awaiting reduction.
//!
//! The queue owns the serialization lock. Taking the head with
//! [`MessageQueue::begin`] locks the queue; the head keeps counting towards
//! [`MessageQueue::len`] until [`MessageQueue::finish`] releases the lock, so
//! observers see the slot occupied for the whole reduction.

use std::collections::VecDeque;

/// FIFO message buffer with a single-slot reduction lock.
#[derive(Debug)]
pub struct MessageQueue<T> {
    pending: VecDeque<T>,
    in_flight: bool,
}

impl<T> Default for MessageQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> MessageQueue<T> {
    /// Create an empty, unlocked queue.
    pub fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            in_flight: false,
        }
    }

    /// Append a message at the tail.
    ///
    /// Returns `true` when no reduction holds the lock, i.e. the caller should
    /// advance now. Messages left behind while advancing was suspended are
    /// picked up by that same advance, ahead of `msg`.
    pub fn push(&mut self, msg: T) -> bool {
        self.pending.push_back(msg);
        !self.in_flight
    }

    /// Lock the queue and take the head for reduction.
    ///
    /// Returns `None` while a reduction is in flight or when nothing is
    /// pending.
    pub fn begin(&mut self) -> Option<T> {
        if self.in_flight {
            return None;
        }
        let head = self.pending.pop_front()?;
        self.in_flight = true;
        Some(head)
    }

    /// Release the head slot and the lock.
    pub fn finish(&mut self) {
        self.in_flight = false;
    }

    /// Whether a reduction currently holds the lock.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.in_flight
    }

    /// Number of messages, counting the one being reduced.
    #[inline]
    pub fn len(&self) -> usize {
        self.pending.len() + usize::from(self.in_flight)
    }

    /// Whether nothing is pending or in flight.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
