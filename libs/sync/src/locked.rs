// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::lock::{HolderLock, SpinLock};
use crate::loom::cell::UnsafeCell;
use crate::loom_const_fn;
use core::fmt;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};

/// A value guarded by a [`HolderLock`].
///
/// The data can only be reached through the RAII guards returned from
/// [`lock`][Self::lock] and [`try_lock`][Self::try_lock], so it is only ever
/// touched while the lock is held. The default lock is the spinning variant;
/// regions held for longer can pick [`MutexLock`][crate::MutexLock].
pub struct Locked<T, L: HolderLock = SpinLock> {
    lock: L,
    data: UnsafeCell<T>,
}

/// An RAII guard for [`Locked`]; releases the lock on drop.
#[clippy::has_significant_drop]
#[must_use = "if unused the lock will immediately release"]
pub struct LockedGuard<'a, T, L: HolderLock> {
    locked: &'a Locked<T, L>,
    marker: PhantomData<&'a mut T>,
}

// Safety: the lock serializes all access to the inner value.
unsafe impl<T: Send, L: HolderLock + Send> Send for Locked<T, L> {}
// Safety: the lock serializes all access to the inner value.
unsafe impl<T: Send, L: HolderLock + Sync> Sync for Locked<T, L> {}

// === impl Locked ===

impl<T> Locked<T, SpinLock> {
    loom_const_fn! {
        pub const fn new(value: T) -> Self {
            Self {
                lock: SpinLock::new(),
                data: UnsafeCell::new(value),
            }
        }
    }
}

impl<T, L: HolderLock + Default> Locked<T, L> {
    pub fn with_lock(value: T) -> Self {
        Self {
            lock: L::default(),
            data: UnsafeCell::new(value),
        }
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T, L: HolderLock> Locked<T, L> {
    /// Acquires the lock, blocking the calling thread until it is free.
    #[inline]
    pub fn lock(&self) -> LockedGuard<'_, T, L> {
        self.lock.acquire();
        LockedGuard {
            locked: self,
            marker: PhantomData,
        }
    }

    /// Attempts to acquire the lock without blocking.
    #[inline]
    pub fn try_lock(&self) -> Option<LockedGuard<'_, T, L>> {
        self.lock.try_acquire().then_some(LockedGuard {
            locked: self,
            marker: PhantomData,
        })
    }

    #[inline]
    pub fn held(&self) -> bool {
        self.lock.held()
    }

    /// Returns a mutable reference to the underlying data without locking;
    /// the exclusive borrow guarantees no guard exists.
    #[inline]
    pub fn get_mut(&mut self) -> &mut T {
        // Safety: `&mut self` rules out any outstanding guard.
        self.data.with_mut(|data| unsafe { &mut *data })
    }
}

impl<T: Default, L: HolderLock + Default> Default for Locked<T, L> {
    fn default() -> Self {
        Self::with_lock(T::default())
    }
}

impl<T: fmt::Debug, L: HolderLock> fmt::Debug for Locked<T, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.try_lock() {
            Some(guard) => f
                .debug_struct("Locked")
                .field("data", &&*guard)
                .finish_non_exhaustive(),
            None => f
                .debug_struct("Locked")
                .field("data", &"<locked>")
                .finish_non_exhaustive(),
        }
    }
}

// === impl LockedGuard ===

impl<'a, T: 'a, L: HolderLock> Deref for LockedGuard<'a, T, L> {
    type Target = T;
    #[inline]
    fn deref(&self) -> &T {
        // Safety: the guard holds the lock, so access is exclusive.
        self.locked.data.with(|data| unsafe { &*data })
    }
}

impl<'a, T: 'a, L: HolderLock> DerefMut for LockedGuard<'a, T, L> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        // Safety: the guard holds the lock, so access is exclusive.
        self.locked.data.with_mut(|data| unsafe { &mut *data })
    }
}

impl<'a, T: 'a, L: HolderLock> Drop for LockedGuard<'a, T, L> {
    #[inline]
    fn drop(&mut self) {
        let released = self.locked.lock.release();
        debug_assert!(released, "guard dropped on a non-holder thread");
    }
}

impl<'a, T: fmt::Debug + 'a, L: HolderLock> fmt::Debug for LockedGuard<'a, T, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}
