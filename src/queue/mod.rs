//! Thread-safe queues for handing messages between threads inside a process.
//!
//! This module contains:
//! - `ThreadSafeDeque`: mutex-protected double-ended queue
//! - `BoundedMessageQueue`: envelope queue with head-admission backpressure
//! - `FixedSlotRingQueue`: preallocated single-consumer ring of fixed slots
//!
//! The usual producer is a subscribe endpoint's receive loop; the usual
//! consumer is a worker thread draining the queue.

mod bounded;
mod deque;
mod ring;

pub use bounded::{BoundedMessageQueue, Envelope, DEFAULT_MAX_LENGTH, ENVELOPE_PAYLOAD_CAPACITY};
pub use deque::ThreadSafeDeque;
pub use ring::FixedSlotRingQueue;

/// Result type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;

/// Errors that can occur during queue operations.
///
/// Every failing operation leaves the queue exactly as it was before the call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("Allocation failed while copying {bytes} bytes")]
    Allocation { bytes: usize },

    #[error("Queue full (max {max})")]
    Full { max: usize },

    #[error("Element of {size} bytes exceeds slot capacity of {capacity} bytes")]
    SlotOverflow { size: usize, capacity: usize },

    #[error("Invalid queue configuration: {0}")]
    InvalidConfig(String),
}

impl QueueError {
    /// Returns true if the failure was a capacity rejection (queue or slot).
    pub fn is_capacity(&self) -> bool {
        matches!(self, Self::Full { .. } | Self::SlotOverflow { .. })
    }
}

/// Copy a byte slice into freshly allocated owned storage.
///
/// Reports allocation failure instead of aborting.
pub(crate) fn copy_blob(data: &[u8]) -> Result<Vec<u8>> {
    let mut owned = Vec::new();
    owned
        .try_reserve_exact(data.len())
        .map_err(|_| QueueError::Allocation { bytes: data.len() })?;
    owned.extend_from_slice(data);
    Ok(owned)
}
