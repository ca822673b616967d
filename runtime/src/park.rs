// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Parked-worker bookkeeping.
//!
//! An idle worker backs off briefly, then parks here. Unparks come from
//! three places: a continuation firing for a work the sleeper suspended, a
//! donor pushing into an empty shared deque, and engine shutdown. A pending
//! unpark is remembered, so an unpark that races a park is never lost.

use crate::loom::sync::{Condvar, Mutex};
use core::fmt;
use filament_sync::Locked;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

struct ParkInner {
    notified: Mutex<bool>,
    condvar: Condvar,
}

/// One worker's sleeping spot.
#[derive(Clone)]
pub struct Parker {
    inner: Arc<ParkInner>,
}

/// Wakes the matching [`Parker`] from any thread.
#[derive(Clone)]
pub struct Unparker {
    inner: Arc<ParkInner>,
}

// === impl Parker ===

impl Parker {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ParkInner {
                notified: Mutex::new(false),
                condvar: Condvar::new(),
            }),
        }
    }

    #[must_use]
    pub fn unparker(&self) -> Unparker {
        Unparker {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Blocks until unparked; consumes a pending unpark immediately.
    pub fn park(&self) {
        let mut notified = self.inner.notified.lock().expect("parker poisoned");
        while !*notified {
            notified = self
                .inner
                .condvar
                .wait(notified)
                .expect("parker poisoned");
        }
        *notified = false;
    }
}

impl Default for Parker {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Parker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parker").finish_non_exhaustive()
    }
}

// === impl Unparker ===

impl Unparker {
    pub fn unpark(&self) {
        let mut notified = self.inner.notified.lock().expect("parker poisoned");
        *notified = true;
        self.inner.condvar.notify_one();
    }
}

impl fmt::Debug for Unparker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unparker").finish_non_exhaustive()
    }
}

/// Where idle workers wait and producers find them.
pub struct ParkingLot {
    num_parked: AtomicUsize,
    sleepers: Locked<Vec<Unparker>>,
}

// === impl ParkingLot ===

impl ParkingLot {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            num_parked: AtomicUsize::new(0),
            sleepers: Locked::new(Vec::with_capacity(capacity)),
        }
    }

    pub fn num_parked(&self) -> usize {
        self.num_parked.load(Ordering::Acquire)
    }

    /// Parks the calling worker until somebody unparks it.
    pub fn park(&self, parker: &Parker) {
        self.park_with(parker, || false);
    }

    /// Parks unless `should_wake` already holds once the worker is
    /// registered as a sleeper.
    ///
    /// The registration-then-recheck order closes the race with producers
    /// that publish work and then wake the sleepers they can see: either
    /// the producer finds this worker registered, or the recheck sees the
    /// producer's work.
    pub fn park_with(&self, parker: &Parker, should_wake: impl Fn() -> bool) {
        self.num_parked.fetch_add(1, Ordering::AcqRel);
        self.sleepers.lock().push(parker.unparker());

        if !should_wake() {
            parker.park();
        }

        // a worker woken directly (by a continuation) is still listed here;
        // withdraw so stale entries do not pile up
        let mut sleepers = self.sleepers.lock();
        if let Some(position) = sleepers
            .iter()
            .position(|sleeper| Arc::ptr_eq(&sleeper.inner, &parker.inner))
        {
            sleepers.swap_remove(position);
        }
        drop(sleepers);

        self.num_parked.fetch_sub(1, Ordering::AcqRel);
    }

    /// Wakes one parked worker, if any.
    pub fn unpark_one(&self) {
        let sleeper = self.sleepers.lock().pop();
        if let Some(sleeper) = sleeper {
            sleeper.unpark();
        }
    }

    /// Wakes every parked worker.
    pub fn unpark_all(&self) {
        let sleepers = std::mem::take(&mut *self.sleepers.lock());
        for sleeper in sleepers {
            sleeper.unpark();
        }
    }
}

impl fmt::Debug for ParkingLot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParkingLot")
            .field("num_parked", &self.num_parked())
            .finish_non_exhaustive()
    }
}
