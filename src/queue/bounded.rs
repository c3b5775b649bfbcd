//! Envelope queue with head-admission backpressure.
//!
//! Tail insertion is normal arrival order and always admitted. Head insertion
//! puts a message back in front of newer ones (retry) and is refused once the
//! queue holds `max_length` envelopes, so retry storms cannot grow it without
//! bound.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{trace, warn};

use super::{copy_blob, QueueError, Result, ThreadSafeDeque};

/// Payload capacity of one envelope in bytes.
pub const ENVELOPE_PAYLOAD_CAPACITY: usize = 5 * 1024;

/// Default maximum queue length for head admission.
pub const DEFAULT_MAX_LENGTH: usize = 50;

/// Fixed-schema message record carried by `BoundedMessageQueue`.
///
/// Payloads longer than `ENVELOPE_PAYLOAD_CAPACITY` are truncated silently;
/// `length` is always the number of bytes actually stored.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Envelope {
    /// Application-defined message type.
    pub kind: i32,
    /// Stored payload length in bytes.
    pub length: usize,
    payload: Vec<u8>,
    /// Sequence assigned on tail enqueue (0 = never enqueued).
    pub sequence: u64,
    /// Enqueue time, microseconds since the Unix epoch.
    pub timestamp_micros: i64,
}

impl Envelope {
    /// Build an envelope from a borrowed payload, copying at most
    /// `ENVELOPE_PAYLOAD_CAPACITY` bytes.
    pub fn new(kind: i32, data: &[u8]) -> Result<Self> {
        let stored = &data[..data.len().min(ENVELOPE_PAYLOAD_CAPACITY)];
        let payload = copy_blob(stored)?;
        Ok(Self::with_payload(kind, payload))
    }

    /// Build an envelope that takes ownership of `data`, truncating in place.
    pub fn from_vec(kind: i32, mut data: Vec<u8>) -> Self {
        data.truncate(ENVELOPE_PAYLOAD_CAPACITY);
        Self::with_payload(kind, data)
    }

    fn with_payload(kind: i32, payload: Vec<u8>) -> Self {
        Self {
            kind,
            length: payload.len(),
            payload,
            sequence: 0,
            timestamp_micros: 0,
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Copy this envelope, reporting allocation failure.
    fn try_clone(&self) -> Result<Self> {
        Ok(Self {
            payload: copy_blob(&self.payload)?,
            ..*self
        })
    }
}

#[derive(Debug)]
struct Admission {
    current_length: usize,
    next_sequence: u64,
}

/// Queue of `Envelope`s layered on `ThreadSafeDeque`.
///
/// The admission lock is held across the deque operation so `len()` and the
/// deque contents never disagree.
#[derive(Debug)]
pub struct BoundedMessageQueue {
    deque: ThreadSafeDeque<Envelope>,
    admission: Mutex<Admission>,
    max_length: usize,
}

impl BoundedMessageQueue {
    /// Create a queue refusing head insertion at `max_length` envelopes.
    pub fn new(max_length: usize) -> Self {
        Self {
            deque: ThreadSafeDeque::new(),
            admission: Mutex::new(Admission {
                current_length: 0,
                next_sequence: 1,
            }),
            max_length,
        }
    }

    /// Create a queue with `DEFAULT_MAX_LENGTH`.
    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_MAX_LENGTH)
    }

    fn admission(&self) -> MutexGuard<'_, Admission> {
        self.admission
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy `envelope` to the tail. Always admitted.
    ///
    /// Stamps the stored copy with the next sequence number and the current
    /// time, and returns the sequence.
    pub fn enqueue_tail(&self, envelope: &Envelope) -> Result<u64> {
        let mut stored = envelope.try_clone()?;
        let mut admission = self.admission();

        stored.sequence = admission.next_sequence;
        stored.timestamp_micros = chrono::Utc::now().timestamp_micros();
        let sequence = stored.sequence;

        self.deque.push_tail(stored)?;
        admission.current_length += 1;
        admission.next_sequence += 1;

        trace!(sequence, length = admission.current_length, "Envelope enqueued at tail");
        Ok(sequence)
    }

    /// Copy `envelope` to the head unless the queue is at `max_length`.
    ///
    /// The copy keeps the envelope's existing sequence and timestamp: head
    /// insertion is for re-queuing a message that was already sequenced.
    pub fn enqueue_head_if_not_full(&self, envelope: &Envelope) -> Result<()> {
        let mut admission = self.admission();
        if admission.current_length >= self.max_length {
            warn!(
                length = admission.current_length,
                max = self.max_length,
                "Head enqueue refused, queue full"
            );
            return Err(QueueError::Full {
                max: self.max_length,
            });
        }

        let stored = envelope.try_clone()?;
        self.deque.push_head(stored)?;
        admission.current_length += 1;

        trace!(
            sequence = envelope.sequence,
            length = admission.current_length,
            "Envelope enqueued at head"
        );
        Ok(())
    }

    /// Remove the oldest envelope.
    pub fn dequeue_head(&self) -> Option<Envelope> {
        let mut admission = self.admission();
        let envelope = self.deque.pop_head()?;
        admission.current_length -= 1;
        Some(envelope)
    }

    /// Remove the newest envelope.
    pub fn dequeue_tail(&self) -> Option<Envelope> {
        let mut admission = self.admission();
        let envelope = self.deque.pop_tail()?;
        admission.current_length -= 1;
        Some(envelope)
    }

    /// Current number of queued envelopes.
    pub fn len(&self) -> usize {
        self.admission().current_length
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_len(&self) -> usize {
        self.max_length
    }
}

impl Default for BoundedMessageQueue {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}
