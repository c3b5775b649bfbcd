//! Queue sizing configuration.

use serde::Deserialize;

use crate::queue::{
    BoundedMessageQueue, FixedSlotRingQueue, QueueError, DEFAULT_MAX_LENGTH,
    ENVELOPE_PAYLOAD_CAPACITY,
};

/// Default number of ring queue slots.
pub const DEFAULT_RING_SLOTS: usize = 32;

/// Sizes for the queues a process hands received messages through.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Head-admission limit of the bounded message queue.
    pub max_length: usize,
    /// Number of ring queue slots.
    pub ring_slots: usize,
    /// Bytes per ring queue slot.
    pub ring_slot_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_length: DEFAULT_MAX_LENGTH,
            ring_slots: DEFAULT_RING_SLOTS,
            ring_slot_size: ENVELOPE_PAYLOAD_CAPACITY,
        }
    }
}

impl QueueConfig {
    pub fn bounded_queue(&self) -> BoundedMessageQueue {
        BoundedMessageQueue::new(self.max_length)
    }

    pub fn ring_queue(&self) -> Result<FixedSlotRingQueue, QueueError> {
        FixedSlotRingQueue::new(self.ring_slots, self.ring_slot_size)
    }
}
