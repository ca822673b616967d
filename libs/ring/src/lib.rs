// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A bounded multi-producer multi-consumer ring buffer.
//!
//! This is the storage behind the shared steal-deque: producers append at
//! the back, stealers take from the front, and each cursor is guarded by a
//! holder-identity [`SpinLock`] so the critical sections stay tiny. The
//! cursors themselves are atomics, which lets [`CyclicQueue::size`] and
//! [`CyclicQueue::is_empty`] answer without taking either lock.

use core::cell::UnsafeCell;
use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering};
use filament_sync::{HolderLock, SpinLock};

pub struct CyclicQueue<T> {
    slots: Box<[UnsafeCell<Option<T>>]>,
    front: AtomicUsize,
    back: AtomicUsize,
    front_lock: SpinLock,
    back_lock: SpinLock,
}

// Safety: the cursor locks serialize every slot access; a slot is written
// only while it is outside the [front, back) live window and read only while
// inside it, so no slot is touched from two threads at once.
unsafe impl<T: Send> Send for CyclicQueue<T> {}
// Safety: see the `Send` impl above.
unsafe impl<T: Send> Sync for CyclicQueue<T> {}

// === impl CyclicQueue ===

impl<T> CyclicQueue<T> {
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "cyclic queue needs a nonzero capacity");
        Self {
            slots: (0..capacity).map(|_| UnsafeCell::new(None)).collect(),
            front: AtomicUsize::new(0),
            back: AtomicUsize::new(0),
            front_lock: SpinLock::new(),
            back_lock: SpinLock::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// The number of items currently queued.
    ///
    /// Racy by nature: concurrent pushes and pops may move the answer, but
    /// it never exceeds [`capacity`][Self::capacity] and never goes
    /// negative.
    pub fn size(&self) -> usize {
        let back = self.back.load(Ordering::Acquire);
        let front = self.front.load(Ordering::Acquire);
        back.wrapping_sub(front).min(self.capacity())
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Appends `value` at the back.
    ///
    /// # Panics
    ///
    /// Panics if the queue is full; callers that would rather keep the item
    /// use [`try_push`][Self::try_push].
    pub fn push(&self, value: T) {
        assert!(self.try_push(value).is_ok(), "cyclic queue overflow");
    }

    /// Appends `value` at the back, handing it back if the queue is full.
    pub fn try_push(&self, value: T) -> Result<(), T> {
        self.back_lock.acquire();

        let back = self.back.load(Ordering::Relaxed);
        let front = self.front.load(Ordering::Acquire);
        if back.wrapping_sub(front) >= self.capacity() {
            let released = self.back_lock.release();
            debug_assert!(released);
            return Err(value);
        }

        let slot = &self.slots[back % self.capacity()];
        // Safety: the back lock is held and the slot at `back` is outside
        // the live window until the cursor below is published.
        unsafe { *slot.get() = Some(value) };
        self.back.store(back.wrapping_add(1), Ordering::Release);

        let released = self.back_lock.release();
        debug_assert!(released);
        Ok(())
    }

    /// Takes the item at the front, if any.
    pub fn pop(&self) -> Option<T> {
        self.front_lock.acquire();

        let front = self.front.load(Ordering::Relaxed);
        if front == self.back.load(Ordering::Acquire) {
            let released = self.front_lock.release();
            debug_assert!(released);
            return None;
        }

        let slot = &self.slots[front % self.capacity()];
        // Safety: the front lock is held and `front != back`, so the slot is
        // inside the live window and fully published by the producer's
        // release store.
        let value = unsafe { (*slot.get()).take() };
        debug_assert!(value.is_some(), "live slot was empty");
        self.front.store(front.wrapping_add(1), Ordering::Release);

        let released = self.front_lock.release();
        debug_assert!(released);
        value
    }
}

impl<T> fmt::Debug for CyclicQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CyclicQueue")
            .field("size", &self.size())
            .field("capacity", &self.capacity())
            .finish_non_exhaustive()
    }
}
