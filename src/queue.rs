//! Fixed-capacity circular buffer of owned message handles.
//!
//! The queue holds no lock of its own. Every call must be made while holding
//! the guard of the [`QueueEndpoint`](crate::endpoint::QueueEndpoint) that owns
//! it; `&mut self` on the mutating methods enforces that statically.

use crate::error::{BusError, QueueError};
use crate::message::Message;

/// Queue of heap-resident messages as stored by an endpoint.
pub type MessageQueue = BoundedQueue<Box<Message>>;

/// Bounded FIFO ring with explicit head/tail/count bookkeeping.
///
/// `tail` is the next free slot whenever the queue is not full and `head` is
/// the oldest occupied slot whenever it is not empty. Vacated slots are reset
/// to `None` so no stale ownership lingers in the ring.
#[derive(Debug)]
pub struct BoundedQueue<T> {
    slots: Box<[Option<T>]>,
    head: usize,
    tail: usize,
    count: usize,
}

impl<T> BoundedQueue<T> {
    /// Allocate an empty queue with room for `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Result<Self, BusError> {
        if capacity == 0 {
            return Err(BusError::InvalidConfig {
                message: "queue capacity must be at least 1".to_string(),
            });
        }

        let slots = std::iter::repeat_with(|| None)
            .take(capacity)
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Ok(Self {
            slots,
            head: 0,
            tail: 0,
            count: 0,
        })
    }

    /// Store `item` at the tail.
    ///
    /// On `Full` the item is handed back untouched so the caller keeps
    /// ownership of it.
    pub fn enqueue(&mut self, item: T) -> Result<(), (QueueError, T)> {
        if self.count == self.capacity() {
            return Err((QueueError::Full, item));
        }

        self.slots[self.tail] = Some(item);
        self.tail = (self.tail + 1) % self.capacity();
        self.count += 1;
        Ok(())
    }

    /// Take the oldest item.
    pub fn dequeue(&mut self) -> Result<T, QueueError> {
        if self.count == 0 {
            return Err(QueueError::Empty);
        }

        let item = self.slots[self.head].take().ok_or(QueueError::Empty)?;
        self.head = (self.head + 1) % self.capacity();
        self.count -= 1;
        Ok(item)
    }

    /// The oldest item, left in place.
    pub fn front(&self) -> Option<&T> {
        if self.count == 0 {
            return None;
        }
        self.slots[self.head].as_ref()
    }

    /// Dequeue until empty, returning everything in FIFO order.
    pub fn drain(&mut self) -> Vec<T> {
        let mut drained = Vec::with_capacity(self.count);
        while let Ok(item) = self.dequeue() {
            drained.push(item);
        }
        drained
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.count == self.capacity()
    }

    pub fn remaining_capacity(&self) -> usize {
        self.capacity() - self.count
    }
}
