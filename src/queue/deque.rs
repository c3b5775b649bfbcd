//! Mutex-protected double-ended queue.
//!
//! A single coarse lock covers every operation. Elements are owned by the
//! queue between push and pop; pop hands ownership back to the caller, so
//! nothing inside the queue is ever aliased by a caller.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{copy_blob, QueueError, Result};

/// Double-ended queue safe to share between threads.
///
/// Byte blobs are the common element type (`ThreadSafeDeque<Vec<u8>>`); the
/// `*_copy` helpers copy a borrowed slice into owned storage before taking
/// the lock, so the caller's buffer is never retained.
#[derive(Debug)]
pub struct ThreadSafeDeque<T> {
    items: Mutex<VecDeque<T>>,
}

impl<T> ThreadSafeDeque<T> {
    /// Create an empty deque.
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        // A panicking holder cannot leave the VecDeque half-linked.
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert at the head.
    pub fn push_head(&self, item: T) -> Result<()> {
        let mut items = self.lock();
        reserve_one(&mut items)?;
        items.push_front(item);
        Ok(())
    }

    /// Insert at the tail.
    pub fn push_tail(&self, item: T) -> Result<()> {
        let mut items = self.lock();
        reserve_one(&mut items)?;
        items.push_back(item);
        Ok(())
    }

    /// Remove the head element, transferring ownership to the caller.
    pub fn pop_head(&self) -> Option<T> {
        self.lock().pop_front()
    }

    /// Remove the tail element, transferring ownership to the caller.
    pub fn pop_tail(&self) -> Option<T> {
        self.lock().pop_back()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Number of queued elements.
    ///
    /// Diagnostic only: the value is stale as soon as the lock is released.
    pub fn size(&self) -> usize {
        self.lock().len()
    }

    /// Remove every element.
    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl ThreadSafeDeque<Vec<u8>> {
    /// Copy `blob` and insert the copy at the head.
    pub fn push_head_copy(&self, blob: &[u8]) -> Result<()> {
        let owned = copy_blob(blob)?;
        self.push_head(owned)
    }

    /// Copy `blob` and insert the copy at the tail.
    pub fn push_tail_copy(&self, blob: &[u8]) -> Result<()> {
        let owned = copy_blob(blob)?;
        self.push_tail(owned)
    }
}

impl<T> Default for ThreadSafeDeque<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Grow the ring buffer before mutating so a failed allocation leaves the
/// deque untouched.
fn reserve_one<T>(items: &mut VecDeque<T>) -> Result<()> {
    items.try_reserve(1).map_err(|_| QueueError::Allocation {
        bytes: std::mem::size_of::<T>(),
    })
}
