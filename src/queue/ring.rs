//! Preallocated ring of fixed-size slots.
//!
//! All slot storage is allocated once at construction; `put` and `get` only
//! copy bytes. `get` copies the oldest element into a dedicated consume slot
//! that lives outside the ring, so the ring slot is free again immediately.
//!
//! Single consumer only. The consume slot is shared: a second consumer
//! calling `get` would overwrite the element the first one is still reading.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, trace};

use super::{QueueError, Result};

#[derive(Debug)]
struct Slot {
    buf: Box<[u8]>,
    len: usize,
}

impl Slot {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            len: 0,
        }
    }

    fn fill(&mut self, data: &[u8]) {
        self.buf[..data.len()].copy_from_slice(data);
        self.len = data.len();
    }

    fn bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

#[derive(Debug)]
struct Ring {
    slots: Vec<Slot>,
    consume: Slot,
    free_count: usize,
    used_count: usize,
    read_index: usize,
    write_index: usize,
}

/// Fixed-capacity ring queue for single-producer/single-consumer handoff.
#[derive(Debug)]
pub struct FixedSlotRingQueue {
    ring: Mutex<Ring>,
    num_slots: usize,
    slot_size: usize,
}

impl FixedSlotRingQueue {
    /// Allocate `num_slots` ring slots plus the consume slot, each
    /// `slot_size` bytes.
    pub fn new(num_slots: usize, slot_size: usize) -> Result<Self> {
        if num_slots == 0 {
            return Err(QueueError::InvalidConfig(
                "ring queue needs at least one slot".to_string(),
            ));
        }
        if slot_size == 0 {
            return Err(QueueError::InvalidConfig(
                "ring queue slot size must be non-zero".to_string(),
            ));
        }

        let slots = (0..num_slots).map(|_| Slot::with_capacity(slot_size)).collect();
        debug!(num_slots, slot_size, "Ring queue created");

        Ok(Self {
            ring: Mutex::new(Ring {
                slots,
                consume: Slot::with_capacity(slot_size),
                free_count: num_slots,
                used_count: 0,
                read_index: 0,
                write_index: 0,
            }),
            num_slots,
            slot_size,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Ring> {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy `data` into the next free slot.
    ///
    /// Rejects data larger than a slot (no truncation) and rejects when every
    /// slot holds unread data (no blocking, no overwrite).
    pub fn put(&self, data: &[u8]) -> Result<()> {
        if data.len() > self.slot_size {
            return Err(QueueError::SlotOverflow {
                size: data.len(),
                capacity: self.slot_size,
            });
        }

        let mut ring = self.lock();
        if ring.free_count == 0 {
            return Err(QueueError::Full {
                max: self.num_slots,
            });
        }

        let index = ring.write_index;
        ring.slots[index].fill(data);
        ring.write_index = (index + 1) % self.num_slots;
        ring.free_count -= 1;
        ring.used_count += 1;

        trace!(index, len = data.len(), "Ring slot written");
        Ok(())
    }

    /// Move the oldest element into the consume slot.
    ///
    /// Returns false if the ring is empty; the consume slot then still holds
    /// the previously retrieved element. Read it with `with_consumed`.
    pub fn get(&self) -> bool {
        let mut ring = self.lock();
        if ring.used_count == 0 {
            return false;
        }

        let index = ring.read_index;
        let Ring { slots, consume, .. } = &mut *ring;
        consume.fill(slots[index].bytes());

        ring.read_index = (index + 1) % self.num_slots;
        ring.used_count -= 1;
        ring.free_count += 1;
        true
    }

    /// Read the most recently retrieved element.
    pub fn with_consumed<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let ring = self.lock();
        f(ring.consume.bytes())
    }

    pub fn free_count(&self) -> usize {
        self.lock().free_count
    }

    pub fn used_count(&self) -> usize {
        self.lock().used_count
    }

    pub fn num_slots(&self) -> usize {
        self.num_slots
    }

    pub fn slot_size(&self) -> usize {
        self.slot_size
    }
}
