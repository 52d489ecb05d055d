
use heapless::spsc::Queue;

use crate::log::{trace, warn};

use super::packet::Frame;

/// Maximum number of frames the TX queue can be configured to hold
pub const TX_QUEUE_SLOTS: usize = 32;

/// Fixed capacity FIFO of frames awaiting transmission.
///
/// Storage is a ring with one sentinel slot, the configured capacity
/// (at most `TX_QUEUE_SLOTS`) bounds the number of frames held.
pub struct TxQueue {
    capacity: usize,
    frames: Queue<Frame, { TX_QUEUE_SLOTS + 1 }>,
}

impl TxQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.min(TX_QUEUE_SLOTS),
            frames: Queue::new(),
        }
    }

    /// Append a frame at the tail, returning it if the queue is full
    pub fn push(&mut self, frame: Frame) -> Result<(), Frame> {
        if self.is_full() {
            return Err(frame);
        }

        self.frames.enqueue(frame)?;

        trace!("TX queue push ({}/{})", self.len(), self.capacity);

        Ok(())
    }

    /// Remove the frame at the head
    pub fn pop(&mut self) -> Option<Frame> {
        let f = self.frames.dequeue();
        if f.is_none() {
            warn!("Attempted pop from empty TX queue");
        }
        f
    }

    pub fn peek(&self) -> Option<&Frame> {
        self.frames.peek()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    /// Discard all queued frames, returning the number dropped
    pub fn clear(&mut self) -> usize {
        let mut n = 0;
        while self.frames.dequeue().is_some() {
            n += 1;
        }
        n
    }
}
