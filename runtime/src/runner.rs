// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The per-worker scheduler.
//!
//! Each worker owns a private LIFO stack plus two size-classified pending
//! buckets, and shares the engine's FIFO steal-deque. Fresh spawns go onto
//! the stack; when it grows past its high-water mark the oldest entries
//! spill into the buckets, and bucketed works are donated to the shared
//! deque whenever peers might be starving — large works first, since a
//! stealer pays a queue round-trip for whatever it gets.
//!
//! A body that cannot progress suspends instead of blocking: the worker
//! parks the work next to a snapshot of its wake counter, pushes the
//! missing dependencies (now marked `required`) onto the stack, and moves
//! on. The continuation installed by the await bumps the counter and
//! unparks this worker; any counter movement past a parked work's snapshot
//! puts it back on the stack.

use crate::context::Context;
use crate::continuation::{Continuation, Signal};
use crate::engine::{EngineShared, Steal};
use crate::park::{Parker, Unparker};
use crate::work::{RunOutcome, WorkRef};
use filament_sync::{SpinWait, WorkerId};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Entries on the private stack past this spill into the pending buckets.
const SPILL_LIMIT: usize = 16;

/// A worker's wake counter: the receiving end of every continuation this
/// worker installs.
pub(crate) struct WakeCounter {
    count: AtomicU32,
    unparker: Unparker,
}

impl Signal for WakeCounter {
    fn notify(&self) {
        self.count.fetch_add(1, Ordering::Release);
        self.unparker.unpark();
    }

    fn count(&self) -> u32 {
        self.count.load(Ordering::Acquire)
    }
}

enum StealOutcome {
    Stolen,
    Shutdown,
    Empty,
}

pub(crate) struct Runner {
    id: WorkerId,
    engine: Arc<EngineShared>,
    signal: Arc<WakeCounter>,
    parker: Parker,
    /// Private LIFO stack; single-owner, mutated without locking.
    stack: Vec<WorkRef>,
    /// Pending works below the cache-derived size threshold.
    small: VecDeque<WorkRef>,
    /// Pending works at or above the threshold; donated first.
    large: VecDeque<WorkRef>,
    /// Suspended works with the wake-counter snapshot taken before their
    /// last run, plus the continuation they wait on (if any).
    waiting: Vec<Waiting>,
}

struct Waiting {
    work: WorkRef,
    snapshot: u32,
    continuation: Option<Arc<Continuation>>,
}

// === impl Runner ===

impl Runner {
    pub(crate) fn new(id: WorkerId, engine: Arc<EngineShared>) -> Self {
        let parker = Parker::new();
        let signal = Arc::new(WakeCounter {
            count: AtomicU32::new(0),
            unparker: parker.unparker(),
        });
        Self {
            id,
            engine,
            signal,
            parker,
            stack: Vec::new(),
            small: VecDeque::new(),
            large: VecDeque::new(),
            waiting: Vec::new(),
        }
    }

    /// The worker main loop; returns once the termination sentinel (or the
    /// finished root) is observed.
    pub(crate) fn run(&mut self) {
        let _span = tracing::debug_span!("worker", id = %self.id).entered();

        if let Some(root) = self.engine.take_root() {
            tracing::debug!("adopted the root work");
            root.status().enqueue();
            self.stack.push(root);
        }

        let mut spin = SpinWait::new();
        loop {
            self.drain_wakeups();
            self.donate();

            if let Some(work) = self.next_work() {
                spin.reset();
                self.execute(work);
                continue;
            }

            match self.steal() {
                StealOutcome::Stolen => spin.reset(),
                StealOutcome::Shutdown => {
                    tracing::debug!("observed the termination sentinel");
                    break;
                }
                StealOutcome::Empty => {
                    if self.engine.poll_shutdown() {
                        tracing::debug!("root result resolved, shutting down");
                        break;
                    }
                    // out of patience: sleep properly until a donor or a
                    // continuation has something for us
                    if !spin.spin() {
                        self.park();
                        spin.reset();
                    }
                }
            }
        }
    }

    /// Moves every parked work whose continuation has fired since its
    /// snapshot back onto the stack.
    fn drain_wakeups(&mut self) {
        if self.waiting.is_empty() {
            return;
        }
        let count = self.signal.count();

        let mut index = 0;
        while index < self.waiting.len() {
            if count > self.waiting[index].snapshot {
                let waiting = self.waiting.swap_remove(index);
                // the wake may have been for a different work sharing this
                // counter; withdraw the old record so it cannot fire twice
                if let Some(continuation) = waiting.continuation {
                    continuation.invalidate();
                }
                tracing::trace!("wake observed, rescheduling suspended work");
                self.stack.push(waiting.work);
            } else {
                index += 1;
            }
        }
    }

    fn next_work(&mut self) -> Option<WorkRef> {
        self.stack
            .pop()
            .or_else(|| self.small.pop_back())
            .or_else(|| self.large.pop_back())
    }

    fn execute(&mut self, work: WorkRef) {
        if !work.status().acquire() {
            // someone else holds or already finished it
            return;
        }

        let snapshot = self.signal.count();
        let mut cx = Context::new(
            self.engine.table().clone(),
            Arc::clone(&self.signal) as Arc<dyn Signal>,
        );
        let outcome = work.run(&mut cx);
        let spawned = cx.take_spawned();

        match outcome {
            RunOutcome::Finished => {
                for child in spawned {
                    self.push_work(child);
                }
            }
            RunOutcome::Suspended => {
                for child in spawned {
                    self.push_work(child);
                }

                // a body may suspend without waiting on anything concrete;
                // it is then woken by whatever wake reaches this worker next
                let Some(awaited) = cx.suspended.take() else {
                    self.waiting.push(Waiting {
                        work,
                        snapshot,
                        continuation: None,
                    });
                    return;
                };
                for dep in &awaited.deps {
                    // a dependency discovered at await time may never have
                    // been spawned; it is queued (on this stack) now
                    dep.status().enqueue();
                    dep.status().require();
                }
                self.waiting.push(Waiting {
                    work,
                    snapshot,
                    continuation: Some(awaited.continuation),
                });
                // dependencies on top of the stack, first dependency first
                for dep in awaited.deps.into_iter().rev() {
                    if !dep.done() {
                        self.stack.push(dep);
                    }
                }
            }
        }
    }

    fn push_work(&mut self, work: WorkRef) {
        self.stack.push(work);
        if self.stack.len() > SPILL_LIMIT {
            let oldest = self.stack.remove(0);
            self.bucket(oldest);
        }
    }

    fn bucket(&mut self, work: WorkRef) {
        if work.bounds().upper < self.engine.small_limit() {
            self.small.push_back(work);
        } else {
            self.large.push_back(work);
        }
    }

    /// Offers pending work to peers when they might be starving: the deque
    /// ran dry or somebody is parked.
    fn donate(&mut self) {
        if self.small.is_empty() && self.large.is_empty() {
            return;
        }
        let deque_empty = self.engine.deque().is_empty();
        if !deque_empty && self.engine.lot().num_parked() == 0 {
            return;
        }

        let Some(work) = self.large.pop_front().or_else(|| self.small.pop_front()) else {
            return;
        };
        match self
            .engine
            .deque()
            .try_push(Steal::Work(Arc::downgrade(&work)))
        {
            Ok(()) => {
                tracing::trace!("donated a work to the shared deque");
                self.engine.lot().unpark_one();
            }
            Err(_) => {
                // deque momentarily full; keep it local
                self.bucket(work);
            }
        }
    }

    fn steal(&mut self) -> StealOutcome {
        loop {
            match self.engine.deque().pop() {
                None => return StealOutcome::Empty,
                Some(Steal::Shutdown) => {
                    // leave the sentinel for our peers
                    self.engine.repush_sentinel();
                    return StealOutcome::Shutdown;
                }
                Some(Steal::Work(weak)) => {
                    if let Some(work) = weak.upgrade()
                        && !work.done()
                    {
                        tracing::trace!("stole a work from the shared deque");
                        self.stack.push(work);
                        return StealOutcome::Stolen;
                    }
                    // expired or finished entry; keep draining
                }
            }
        }
    }

    fn park(&mut self) {
        let engine = &self.engine;
        let seen_shutdowns = engine.shutdown_count();
        tracing::trace!("out of work, parking");
        engine.lot().park_with(&self.parker, || {
            engine.shutdown_count() != seen_shutdowns || !engine.deque().is_empty()
        });
    }
}
