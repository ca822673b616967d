// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Per-thread worker identities.
//!
//! Worker threads register a small stable id at startup; the locks in this
//! crate use it as the holder identity. Threads that never register (the
//! driver thread, test threads) share the distinguished [`WorkerId::EXTERNAL`]
//! identity, which can still hold locks but is not distinguishable from
//! other unregistered threads.

use core::cell::Cell;
use core::fmt;

/// A stable, small identifier for a worker thread pinned to one CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(u8);

// === impl WorkerId ===

impl WorkerId {
    /// The identity shared by all threads outside the worker pool.
    pub const EXTERNAL: WorkerId = WorkerId(u8::MAX);

    /// The largest number of workers the registry can name.
    pub const MAX_WORKERS: usize = 254;

    /// # Panics
    ///
    /// Panics if `id` does not fit the registry (more than
    /// [`Self::MAX_WORKERS`] workers).
    #[must_use]
    pub fn new(id: usize) -> Self {
        assert!(id < Self::MAX_WORKERS, "worker id {id} out of range");
        Self(u8::try_from(id).expect("asserted in range"))
    }

    #[inline]
    pub fn as_usize(self) -> usize {
        usize::from(self.0)
    }

    /// The nonzero token this identity installs into a lock's holder word.
    #[inline]
    pub(crate) fn token(self) -> u8 {
        // 0 is reserved for "unlocked"; EXTERNAL maps onto u8::MAX itself.
        if self == Self::EXTERNAL { u8::MAX } else { self.0 + 1 }
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::EXTERNAL {
            f.write_str("external")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

thread_local! {
    static CURRENT: Cell<Option<WorkerId>> = const { Cell::new(None) };
}

/// Registers the calling thread as `id`.
///
/// Workers call this once during pool startup. Re-registering (tests reuse
/// threads) simply replaces the identity.
pub fn register_current(id: WorkerId) {
    CURRENT.with(|current| current.set(Some(id)));
}

/// The calling thread's identity; [`WorkerId::EXTERNAL`] if it never
/// registered.
#[must_use]
pub fn current() -> WorkerId {
    CURRENT.with(|current| current.get().unwrap_or(WorkerId::EXTERNAL))
}
