// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::loom::sync::atomic::{AtomicU8, Ordering};
use crate::registry;
use crate::{SpinWait, loom_const_fn};
use lock_api::RawMutex as _;

const UNLOCKED: u8 = 0;

/// A non-reentrant lock that records its holder's [`WorkerId`][crate::WorkerId].
///
/// Unlike an RAII mutex, acquisition and release are separate calls so a
/// holder can span non-lexical regions; in exchange, [`release`][Self::release]
/// verifies the caller actually is the holder and refuses otherwise.
///
/// Reentrancy is not supported: a holder that re-acquires deadlocks (the
/// blocking variants) or fails (`try_acquire`).
pub trait HolderLock {
    /// Attempts to acquire the lock for the calling thread without blocking.
    fn try_acquire(&self) -> bool;

    /// Acquires the lock for the calling thread, blocking until it is free.
    fn acquire(&self);

    /// Releases the lock.
    ///
    /// Returns `false` (and releases nothing) when the calling thread is not
    /// the current holder.
    fn release(&self) -> bool;

    /// Whether any thread currently holds the lock.
    fn held(&self) -> bool;
}

/// The spinning [`HolderLock`] variant: a CAS on the holder word behind a
/// spin-then-yield wait.
#[derive(Debug)]
pub struct SpinLock {
    holder: AtomicU8,
}

/// The blocking [`HolderLock`] variant: an OS-assisted mutex plus a holder
/// word for identity checks.
pub struct MutexLock {
    raw: parking_lot::RawMutex,
    holder: AtomicU8,
}

impl core::fmt::Debug for MutexLock {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MutexLock")
            .field("holder", &self.holder)
            .finish()
    }
}

// === impl SpinLock ===

impl SpinLock {
    loom_const_fn! {
        pub const fn new() -> Self {
            Self {
                holder: AtomicU8::new(UNLOCKED),
            }
        }
    }
}

impl HolderLock for SpinLock {
    fn try_acquire(&self) -> bool {
        let token = registry::current().token();
        self.holder
            .compare_exchange(UNLOCKED, token, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    fn acquire(&self) {
        let mut wait = SpinWait::new();
        while !self.try_acquire() {
            while self.held() {
                wait.spin();
            }
        }
    }

    fn release(&self) -> bool {
        let token = registry::current().token();
        self.holder
            .compare_exchange(token, UNLOCKED, Ordering::Release, Ordering::Relaxed)
            .is_ok()
    }

    fn held(&self) -> bool {
        self.holder.load(Ordering::Relaxed) != UNLOCKED
    }
}

impl Default for SpinLock {
    fn default() -> Self {
        Self::new()
    }
}

// === impl MutexLock ===

impl MutexLock {
    pub const fn new() -> Self {
        Self {
            raw: parking_lot::RawMutex::INIT,
            holder: AtomicU8::new(UNLOCKED),
        }
    }
}

impl HolderLock for MutexLock {
    fn try_acquire(&self) -> bool {
        if self.raw.try_lock() {
            self.holder
                .store(registry::current().token(), Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    fn acquire(&self) {
        self.raw.lock();
        self.holder
            .store(registry::current().token(), Ordering::Relaxed);
    }

    fn release(&self) -> bool {
        let token = registry::current().token();
        if self.holder.load(Ordering::Relaxed) != token || !self.raw.is_locked() {
            return false;
        }
        self.holder.store(UNLOCKED, Ordering::Relaxed);
        // Safety: the holder word matched the calling thread, so this thread
        // is the one that locked the raw mutex.
        unsafe { self.raw.unlock() };
        true
    }

    fn held(&self) -> bool {
        self.raw.is_locked()
    }
}

impl Default for MutexLock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loom;
    use crate::registry::{WorkerId, register_current};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn exclusivity<L: HolderLock + Send + Sync + Default + 'static>() {
        const THREADS: usize = 4;

        let lock = Arc::new(L::default());
        let acquired = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..THREADS)
            .map(|id| {
                let lock = Arc::clone(&lock);
                let acquired = Arc::clone(&acquired);
                std::thread::spawn(move || {
                    register_current(WorkerId::new(id));
                    if lock.try_acquire() {
                        acquired.fetch_add(1, Ordering::Relaxed);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(acquired.load(Ordering::Relaxed), 1);
        assert!(lock.held());
    }

    #[test]
    fn spin_exclusivity() {
        exclusivity::<SpinLock>();
    }

    #[test]
    fn mutex_exclusivity() {
        exclusivity::<MutexLock>();
    }

    fn release_by_non_holder<L: HolderLock + Send + Sync + Default + 'static>() {
        let lock = Arc::new(L::default());

        {
            let lock = Arc::clone(&lock);
            std::thread::spawn(move || {
                register_current(WorkerId::new(0));
                assert!(lock.try_acquire());
            })
            .join()
            .unwrap();
        }

        // a different identity must not be able to release
        std::thread::spawn(move || {
            register_current(WorkerId::new(1));
            assert!(!lock.release());
            assert!(lock.held());

            register_current(WorkerId::new(0));
            assert!(lock.release());
            assert!(!lock.held());
        })
        .join()
        .unwrap();
    }

    #[test]
    fn spin_release_by_non_holder() {
        release_by_non_holder::<SpinLock>();
    }

    #[test]
    fn mutex_release_by_non_holder() {
        release_by_non_holder::<MutexLock>();
    }

    #[test]
    fn spin_acquire_blocks_until_free() {
        loom::model(|| {
            let lock = Arc::new(SpinLock::new());
            assert!(lock.try_acquire());

            let contender = {
                let lock = Arc::clone(&lock);
                loom::thread::spawn(move || {
                    register_current(WorkerId::new(7));
                    lock.acquire();
                    assert!(lock.release());
                })
            };

            assert!(lock.release());
            contender.join().unwrap();
            assert!(!lock.held());
        });
    }

    #[test]
    fn reacquire_after_release() {
        let lock = SpinLock::new();
        assert!(lock.try_acquire());
        assert!(!lock.try_acquire());
        assert!(lock.release());
        assert!(lock.try_acquire());
        assert!(lock.release());
    }
}
