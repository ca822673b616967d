// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! What a running function body sees of the scheduler.
//!
//! Bodies never touch worker state directly: they build child works with
//! [`Context::call`], hand them over with [`Context::spawn`], and block on
//! lazy values with [`Context::wait`] — which either returns immediately or
//! installs a continuation and signals a stack inversion for the worker
//! loop to unwind. Everything a body did during one run (spawned children,
//! the recorded await) is collected here and drained by the worker
//! afterwards.

use crate::continuation::{Continuation, Signal};
use crate::func::{ClosureTable, Suspend};
use crate::lazy::{Lazy, WorkList};
use crate::value::FnId;
use crate::work::{RunOutcome, Work, WorkRef};
use filament_sync::SpinWait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

pub struct Context {
    table: ClosureTable,
    signal: Arc<dyn Signal>,
    /// Works enqueued by the current body run, in spawn order.
    pub(crate) spawned: Vec<WorkRef>,
    /// The await that suspended the current body run, if any.
    pub(crate) suspended: Option<SuspendedAwait>,
}

pub(crate) struct SuspendedAwait {
    /// The unfinished dependencies the continuation was installed on.
    pub deps: WorkList,
    pub continuation: Arc<Continuation>,
}

/// The signal used by contexts that run outside a worker (the driver's
/// synchronous driving, unit tests): counts wakes, unparks nobody.
#[derive(Default)]
struct DetachedSignal {
    count: AtomicU32,
}

impl Signal for DetachedSignal {
    fn notify(&self) {
        self.count.fetch_add(1, Ordering::Release);
    }

    fn count(&self) -> u32 {
        self.count.load(Ordering::Acquire)
    }
}

// === impl Context ===

impl Context {
    pub(crate) fn new(table: ClosureTable, signal: Arc<dyn Signal>) -> Self {
        Self {
            table,
            signal,
            spawned: Vec::new(),
            suspended: None,
        }
    }

    /// A context bound to no worker; waits are driven to completion on the
    /// calling thread instead of being rescheduled.
    #[must_use]
    pub fn detached(table: ClosureTable) -> Self {
        Self::new(table, Arc::new(DetachedSignal::default()))
    }

    /// Builds (but does not enqueue) the work for one call of `f`.
    ///
    /// Returns the work and the lazy result placeholder(s).
    pub fn call(&self, f: FnId, args: &[Lazy]) -> (WorkRef, Lazy) {
        let r#gen = self.table.resolve(f);
        Work::call(&r#gen, args)
    }

    /// Hands a work to the scheduler: `available -> queued`, no-op if it was
    /// already enqueued by somebody else.
    pub fn spawn(&mut self, work: &WorkRef) {
        if work.status().enqueue() {
            self.spawned.push(Arc::clone(work));
        }
    }

    /// Enqueues every work that must run before `value` is done.
    pub fn demand(&mut self, value: &Lazy) {
        let mut works = WorkList::new();
        value.collect_work(&mut works);
        for work in &works {
            self.spawn(work);
        }
    }

    /// Blocks the body on `values`.
    ///
    /// Returns immediately when everything is already done. Otherwise
    /// installs a fresh continuation on every unfinished dependency and
    /// signals a stack inversion — bodies propagate it with `?` and will be
    /// re-entered once the continuation fires.
    pub fn wait(&mut self, values: &[&Lazy]) -> Result<(), Suspend> {
        let mut spin = SpinWait::new();
        loop {
            let mut deps = WorkList::new();
            for value in values {
                value.collect_work(&mut deps);
            }
            deps.retain(|work| !work.done());

            if deps.is_empty() {
                if values.iter().all(|value| value.done()) {
                    return Ok(());
                }
                // a dependency finished by chaining to a fresh placeholder
                // between the collect and the check; gather the new link
                spin.spin();
                continue;
            }

            let remaining = u32::try_from(deps.len()).expect("dependency count fits u32");
            let continuation = Continuation::new(remaining, Arc::clone(&self.signal));
            for dep in &deps {
                if !dep.add_continuation(Arc::clone(&continuation)) {
                    // finished in the meantime; count it down ourselves
                    continuation.update();
                }
            }

            tracing::trace!(deps = deps.len(), "body suspending on unfinished values");
            self.suspended = Some(SuspendedAwait { deps, continuation });
            return Err(Suspend);
        }
    }

    /// The strong form of [`wait`][Self::wait]: drives every dependency to
    /// completion on the calling thread instead of suspending.
    pub fn wait_all(&mut self, values: &[&Lazy]) {
        let mut spin = SpinWait::new();
        loop {
            let mut deps = WorkList::new();
            for value in values {
                value.collect_work(&mut deps);
            }
            deps.retain(|work| !work.done());
            if deps.is_empty() {
                if values.iter().all(|value| value.done()) {
                    return;
                }
                spin.spin();
                continue;
            }
            for dep in &deps {
                self.drive(dep);
            }
        }
    }

    /// Runs `work` to completion, recursing into its dependencies
    /// depth-first; spins (briefly) when another worker holds it.
    pub fn drive(&mut self, work: &WorkRef) {
        let mut spin = SpinWait::new();
        while !work.done() {
            work.status().enqueue();
            work.status().require();
            if !work.status().acquire() {
                spin.spin();
                continue;
            }
            if work.done() {
                work.status().cancel();
                return;
            }
            match work.run(self) {
                RunOutcome::Finished => {}
                RunOutcome::Suspended => {
                    let awaited = self
                        .suspended
                        .take()
                        .expect("suspension without a recorded await");
                    for dep in awaited.deps {
                        self.drive(&dep);
                    }
                }
            }
        }
    }

    /// Drains the works spawned by the last body run.
    pub fn take_spawned(&mut self) -> Vec<WorkRef> {
        std::mem::take(&mut self.spawned)
    }
}
