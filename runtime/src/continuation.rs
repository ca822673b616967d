// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Countdown records that wake a suspended work.
//!
//! A work that suspends on `k` unfinished dependencies installs one
//! [`Continuation`] with `remaining = k` on all of them. Each dependency's
//! completion counts the record down; the completion that reaches zero wins
//! the validity guard and fires the [`Signal`] exactly once. Wakeups are
//! counters, not edges: the scheduler polls the count against a snapshot, so
//! any number of wakes between two polls coalesces into one reschedule.

use crate::loom::sync::atomic::{AtomicU32, Ordering};
use filament_sync::Locked;
use std::sync::Arc;

/// The receiving end of a continuation: a worker's wake counter, or the
/// engine's shutdown signal.
pub trait Signal: Send + Sync {
    /// Delivers one wake: bumps the counter and unparks whoever polls it.
    fn notify(&self);

    /// The number of wakes delivered so far.
    fn count(&self) -> u32;
}

pub struct Continuation {
    /// Outstanding dependencies; the decrement to zero fires the signal.
    remaining: AtomicU32,
    /// Guards the fire so it happens at most once, and lets a suspended
    /// work abandon the record before it fires.
    valid: Locked<bool>,
    signal: Arc<dyn Signal>,
}

// === impl Continuation ===

impl Continuation {
    pub fn new(remaining: u32, signal: Arc<dyn Signal>) -> Arc<Self> {
        Arc::new(Self {
            remaining: AtomicU32::new(remaining),
            valid: Locked::new(true),
            signal,
        })
    }

    /// Counts one completed dependency.
    pub fn update(&self) {
        if self.remaining.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        let mut valid = self.valid.lock();
        if *valid {
            *valid = false;
            self.signal.notify();
        }
    }

    /// Withdraws the record before it fires.
    ///
    /// Returns `false` when the continuation already fired (or was already
    /// invalidated); counts that were dropped are not restored either way.
    pub fn invalidate(&self) -> bool {
        let mut valid = self.valid.lock();
        let was_valid = *valid;
        *valid = false;
        was_valid
    }

    #[cfg(test)]
    pub(crate) fn is_valid(&self) -> bool {
        *self.valid.lock()
    }
}
