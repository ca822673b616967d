// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::hint;

/// A worker's waiting posture, escalating from spinning to yielding.
///
/// The scheduler's retry loops all have the same shape: the awaited change
/// (a lock freed, a cell assigned, work appearing on the deque) is usually
/// a few instructions away on another core, occasionally much further. So
/// the first few waits burn a handful of pipeline hints, later ones hand
/// the core to the OS, and [`spin`][Self::spin] eventually starts reporting
/// `false` — the signal that a caller with access to a parking lot should
/// go sleep properly. Callers that cannot park may keep calling: an
/// exhausted `SpinWait` still yields, it never degrades into a hot loop.
///
/// The escalation schedule follows `parking_lot`'s spin helper.
#[derive(Debug, Clone)]
pub struct SpinWait {
    counter: u32,
}

/// Waits up to and including this many escalation steps stay on-core.
const SPIN_STEPS: u32 = 4;
/// Past this many steps, `spin` recommends parking.
const YIELD_STEPS: u32 = 10;

// === impl SpinWait ===

impl SpinWait {
    #[must_use]
    pub const fn new() -> Self {
        Self { counter: 0 }
    }

    /// Backs off once, escalating with every fruitless call.
    ///
    /// Returns `false` once enough calls have gone by that parking the
    /// thread would be cheaper than waiting any longer; the wait itself
    /// still happens.
    pub fn spin(&mut self) -> bool {
        if self.counter < YIELD_STEPS {
            self.counter += 1;
        }

        if self.counter <= SPIN_STEPS {
            // loom needs the thread handed back to the model between
            // retries, or other threads never get to make the progress
            // this wait is waiting for
            #[cfg(loom)]
            crate::loom::thread::yield_now();

            for _ in 0..(1_u32 << self.counter) {
                hint::spin_loop();
            }
            return true;
        }

        crate::loom::thread::yield_now();
        self.counter < YIELD_STEPS
    }

    /// Forgets the streak; called after the awaited change was observed.
    #[inline]
    pub fn reset(&mut self) {
        self.counter = 0;
    }
}

impl Default for SpinWait {
    fn default() -> Self {
        Self::new()
    }
}
