// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The top-level driver.
//!
//! [`Engine::run`] wraps a program's entry point into the root work, brings
//! up one pinned worker per CPU behind a startup barrier, publishes the
//! root through a first-come inbox, and joins the pool once the root
//! placeholder resolves.
//!
//! Shutdown is demand-driven like everything else: a continuation installed
//! on the root result fires the [`ShutdownSignal`], the observing worker
//! re-arms it if the result merely chained deeper, and once the result is
//! actually done a typed sentinel makes the rounds on the shared deque so
//! every peer drains out.

use crate::continuation::{Continuation, Signal};
use crate::func::{ClosureTable, Program};
use crate::lazy::{Lazy, WorkList};
use crate::park::ParkingLot;
use crate::runner::Runner;
use crate::sys;
use crate::work::{Work, WorkRef};
use filament_ring::CyclicQueue;
use filament_sync::{Locked, WorkerId, registry};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Barrier, Weak};

/// Pool configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Worker count; defaults to the hardware concurrency. Exists chiefly
    /// so tests and benchmarks can force a given pool size.
    pub num_cpus: Option<usize>,
    /// Log per-thread CPU placement to stderr.
    pub verbose: bool,
}

/// An entry on the shared steal-deque.
pub(crate) enum Steal {
    Work(Weak<Work>),
    /// The termination sentinel; a worker that pops it pushes it back for
    /// its peers and exits.
    Shutdown,
}

/// The wake target of the root result's continuation.
pub(crate) struct ShutdownSignal {
    count: AtomicU32,
    lot: Arc<ParkingLot>,
}

impl Signal for ShutdownSignal {
    fn notify(&self) {
        self.count.fetch_add(1, Ordering::Release);
        self.lot.unpark_all();
    }

    fn count(&self) -> u32 {
        self.count.load(Ordering::Acquire)
    }
}

/// Engine state shared by every worker; there is no process-global mutable
/// state besides the interned constants.
pub(crate) struct EngineShared {
    table: ClosureTable,
    deque: CyclicQueue<Steal>,
    lot: Arc<ParkingLot>,
    /// First-come inbox for the root work.
    root: Locked<Option<WorkRef>>,
    /// The root result the whole run exists to produce.
    result: Lazy,
    shutdown: Arc<ShutdownSignal>,
    /// How many shutdown fires have been consumed by re-arming.
    armed: Locked<u32>,
    sentinel_pushed: AtomicBool,
    /// Upper size bound below which a work counts as small.
    small_limit: usize,
}

// === impl EngineShared ===

impl EngineShared {
    pub(crate) fn new(table: ClosureTable, workers: usize, result: Lazy) -> Arc<Self> {
        let lot = Arc::new(ParkingLot::with_capacity(workers));
        Arc::new(Self {
            table,
            deque: CyclicQueue::new(workers.max(1) * 1024),
            lot: Arc::clone(&lot),
            root: Locked::new(None),
            result,
            shutdown: Arc::new(ShutdownSignal {
                count: AtomicU32::new(0),
                lot,
            }),
            armed: Locked::new(0),
            sentinel_pushed: AtomicBool::new(false),
            small_limit: sys::cache_line_size(),
        })
    }

    pub(crate) fn table(&self) -> &ClosureTable {
        &self.table
    }

    pub(crate) fn deque(&self) -> &CyclicQueue<Steal> {
        &self.deque
    }

    pub(crate) fn lot(&self) -> &ParkingLot {
        &self.lot
    }

    pub(crate) fn small_limit(&self) -> usize {
        self.small_limit
    }

    pub(crate) fn put_root(&self, root: WorkRef) {
        *self.root.lock() = Some(root);
    }

    /// First caller wins the root work.
    pub(crate) fn take_root(&self) -> Option<WorkRef> {
        self.root.lock().take()
    }

    pub(crate) fn shutdown_count(&self) -> u32 {
        self.shutdown.count()
    }

    /// Installs a continuation on everything the root result still waits
    /// for. Caller holds the `armed` guard.
    fn arm(&self) {
        let mut deps = WorkList::new();
        self.result.collect_work(&mut deps);
        if deps.is_empty() {
            // resolved (or about to be); pollers will see it
            return;
        }
        let remaining = u32::try_from(deps.len()).expect("dependency count fits u32");
        let cont = Continuation::new(remaining, Arc::clone(&self.shutdown) as Arc<dyn Signal>);
        for dep in &deps {
            if !dep.add_continuation(Arc::clone(&cont)) {
                cont.update();
            }
        }
        tracing::trace!(deps = deps.len(), "armed the shutdown continuation");
    }

    /// Arms the first shutdown continuation; called once before the workers
    /// start.
    pub(crate) fn arm_initial(&self) {
        let _guard = self.armed.lock();
        self.arm();
    }

    /// Idle-path check: `true` once the run is over.
    ///
    /// A fire of the shutdown signal only means the *current* chain link of
    /// the root result completed; if the result is still pending the
    /// continuation is re-armed on the new dependencies.
    pub(crate) fn poll_shutdown(&self) -> bool {
        if self.result.done() {
            self.push_sentinel();
            return true;
        }
        let mut armed = self.armed.lock();
        let fired = self.shutdown.count();
        if fired > *armed {
            *armed = fired;
            self.arm();
        }
        false
    }

    fn push_sentinel(&self) {
        if self.sentinel_pushed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.repush_sentinel();
        self.lot.unpark_all();
    }

    /// Puts the sentinel (back) onto the deque, displacing a stale entry if
    /// the deque is momentarily full.
    pub(crate) fn repush_sentinel(&self) {
        let mut sentinel = Steal::Shutdown;
        loop {
            match self.deque.try_push(sentinel) {
                Ok(()) => return,
                Err(back) => {
                    sentinel = back;
                    let _ = self.deque.pop();
                }
            }
        }
    }
}

/// The engine: builds the root work, runs the pool, returns the result.
#[derive(Debug, Default)]
pub struct Engine {
    config: Config,
}

// === impl Engine ===

impl Engine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_config(config: Config) -> Self {
        Self { config }
    }

    /// Evaluates `program`'s entry point applied to `args`.
    ///
    /// # Panics
    ///
    /// Panics when the argument count does not match the entry arity (the
    /// driver binary reports that before calling in), when a worker thread
    /// cannot be spawned, or on internal logic faults.
    pub fn run(&self, program: &Program, args: Vec<Lazy>) -> Lazy {
        assert_eq!(
            args.len(),
            program.params.len(),
            "entry arity mismatch should have been rejected by the driver",
        );

        let workers = self
            .config
            .num_cpus
            .unwrap_or_else(sys::hardware_concurrency)
            .clamp(1, WorkerId::MAX_WORKERS);
        tracing::debug!(workers, "starting evaluation");

        let r#gen = program.table.resolve(program.entry);
        let (root, result) = Work::call(&r#gen, &args);

        let shared = EngineShared::new(program.table.clone(), workers, result.clone());
        shared.arm_initial();
        shared.put_root(root);

        let barrier = Arc::new(Barrier::new(workers));
        let handles: Vec<_> = (0..workers)
            .map(|cpu| {
                let shared = Arc::clone(&shared);
                let barrier = Arc::clone(&barrier);
                let verbose = self.config.verbose;
                std::thread::Builder::new()
                    .name(format!("worker-{cpu}"))
                    .spawn(move || {
                        let _abort = AbortOnPanic;

                        match sys::pin_current_thread(cpu) {
                            Ok(()) => tracing::debug!(cpu, "pinned worker"),
                            Err(error) => {
                                tracing::warn!(cpu, %error, "affinity unavailable, running unpinned");
                            }
                        }
                        let priority = match sys::raise_priority() {
                            Ok(priority) => priority,
                            Err(error) => {
                                tracing::warn!(cpu, %error, "real-time priority unavailable");
                                0
                            }
                        };
                        if verbose {
                            eprintln!("Running on CPU {cpu} with priority {priority}");
                        }

                        registry::register_current(WorkerId::new(cpu));
                        barrier.wait();
                        Runner::new(WorkerId::new(cpu), shared).run();
                    })
                    .expect("failed to spawn a worker thread")
            })
            .collect();

        for handle in handles {
            if let Err(panic) = handle.join() {
                std::panic::resume_unwind(panic);
            }
        }

        assert!(result.done(), "workers exited with an unfinished result");
        result
    }
}

/// Scheduler bugs must not strand the sibling workers: a panicking worker
/// takes the process down, matching the runtime's fault model.
struct AbortOnPanic;

impl Drop for AbortOnPanic {
    fn drop(&mut self) {
        if std::thread::panicking() {
            eprintln!("worker thread panicked, aborting");
            std::process::abort();
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cache;
    use crate::func::{FnGen, FnInst, ParamKind, Shape, Suspend};
    use crate::ops;
    use crate::work::SizeClass;
    use crate::Context;

    pub(crate) fn test_engine(table: ClosureTable, result: Lazy) -> Arc<EngineShared> {
        EngineShared::new(table, 1, result)
    }

    struct AddInst {
        x: Lazy,
        y: Lazy,
    }

    impl FnInst for AddInst {
        fn body(&mut self, cx: &mut Context) -> Result<Lazy, Suspend> {
            cx.demand(&self.x);
            cx.demand(&self.y);
            cx.wait(&[&self.x, &self.y])?;
            Ok(cache::lazy_int(self.x.as_int() + self.y.as_int()))
        }

        fn bounds(&self) -> SizeClass {
            SizeClass::exact(9)
        }
    }

    fn add_program() -> (Program, crate::value::FnId) {
        let table = ClosureTable::new();
        let add = table.add(FnGen::new(Shape::Leaf, cache::lazy_unit(), |mut args, _env| {
            let y = args.pop().expect("binary arity");
            let x = args.pop().expect("binary arity");
            Box::new(AddInst { x, y })
        }));
        (
            Program {
                table,
                entry: add,
                params: vec![ParamKind::Int, ParamKind::Int],
            },
            add,
        )
    }

    #[test]
    fn runs_a_two_argument_program() {
        let (program, _) = add_program();
        for workers in 1..=4 {
            let engine = Engine::with_config(Config {
                num_cpus: Some(workers),
                verbose: false,
            });
            let result = engine.run(&program, vec![cache::lazy_int(40), cache::lazy_int(2)]);
            assert_eq!(result.as_int(), 42, "under {workers} workers");
        }
    }

    #[test]
    fn nested_calls_resolve_through_chains() {
        let (program, add) = add_program();

        // entry that spawns two adds and returns the second's placeholder
        struct NestedInst {
            x: Lazy,
            add: crate::value::FnId,
            spawned: Option<Lazy>,
        }
        impl FnInst for NestedInst {
            fn body(&mut self, cx: &mut Context) -> Result<Lazy, Suspend> {
                if self.spawned.is_none() {
                    let (w1, mid) = cx.call(self.add, &[self.x.clone(), cache::lazy_int(1)]);
                    let (w2, out) = cx.call(self.add, &[mid, cache::lazy_int(2)]);
                    cx.spawn(&w1);
                    cx.spawn(&w2);
                    self.spawned = Some(out);
                }
                Ok(self.spawned.clone().expect("just spawned"))
            }
            fn bounds(&self) -> SizeClass {
                SizeClass::exact(20)
            }
        }

        let entry = program.table.add(FnGen::new(
            Shape::Leaf,
            cache::lazy_unit(),
            move |mut args, _env| {
                let x = args.pop().expect("unary arity");
                Box::new(NestedInst {
                    x,
                    add,
                    spawned: None,
                })
            },
        ));
        let program = Program {
            table: program.table,
            entry,
            params: vec![ParamKind::Int],
        };

        for workers in 1..=4 {
            let engine = Engine::with_config(Config {
                num_cpus: Some(workers),
                verbose: false,
            });
            let result = engine.run(&program, vec![cache::lazy_int(10)]);
            assert_eq!(result.as_int(), 13, "under {workers} workers");
        }
    }

    #[test]
    fn sentinel_survives_a_full_deque() {
        let table = ClosureTable::new();
        let _ops = ops::install(&table);
        let shared = test_engine(table, cache::lazy_int(1));

        // the result is already done, so the first poll pushes the sentinel
        assert!(shared.poll_shutdown());
        let popped = shared.deque().pop();
        assert!(matches!(popped, Some(Steal::Shutdown)));
        // peers re-push it for each other
        shared.repush_sentinel();
        assert!(matches!(shared.deque().pop(), Some(Steal::Shutdown)));
    }
}
