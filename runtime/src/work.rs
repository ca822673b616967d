// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The unit of parallelism: one function activation.
//!
//! A work's whole lifecycle lives in one atomic status word so that workers
//! racing to pick it up read the state machine, the `required` flag and the
//! `acquired` flag consistently and commit transitions with a single
//! compare-exchange (see [`Status`]).

use crate::context::Context;
use crate::func::{FnGen, FnInst, Suspend};
use crate::lazy::{Lazy, LazyCell, Link};
use crate::loom::cell::UnsafeCell;
use crate::continuation::Continuation;
use core::fmt;
use core::sync::atomic::Ordering;
use filament_abits::{AtomicBitfield, Layout};
use filament_sync::Locked;
use static_assertions::const_assert_eq;
use std::sync::{Arc, Weak};

pub type WorkRef = Arc<Work>;

/// Declared cost estimate of a function body, unit-less.
///
/// The scheduler only compares the upper bound against a cache-derived
/// threshold to split pending works into small and large donation buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeClass {
    pub lower: usize,
    pub upper: usize,
}

impl SizeClass {
    #[must_use]
    pub const fn exact(size: usize) -> Self {
        Self {
            lower: size,
            upper: size,
        }
    }

    #[must_use]
    pub const fn range(lower: usize, upper: usize) -> Self {
        Self { lower, upper }
    }
}

/// What the scheduler should do with a work after running it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The body produced its value; targets are assigned, waiters notified.
    Finished,
    /// The body surrendered its stack; ownership was released without
    /// touching the targets.
    Suspended,
}

/// The status word layout: `| acquired:1 | required:1 | state:2 |`.
const STATUS_LAYOUT: Layout<3> = Layout::new([2, 1, 1]);

const STATE: usize = 0;
const REQUIRED: usize = 1;
const ACQUIRED: usize = 2;

// the whole lifecycle must pack into the four low bits of the byte, with the
// state machine in the least significant section
const_assert_eq!(STATUS_LAYOUT.total_width(), 4);
const_assert_eq!(STATUS_LAYOUT.offset(STATE), 0);

/// The forward-only lifecycle of a work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkState {
    /// Born, not yet on any queue.
    Available = 0,
    /// On some worker's stack or the shared deque.
    Queued = 1,
    /// Taken by a worker; stays here across suspensions.
    Active = 2,
    /// Targets assigned, continuations notified.
    Finished = 3,
}

impl WorkState {
    fn from_bits(bits: u8) -> Self {
        match bits {
            0 => WorkState::Available,
            1 => WorkState::Queued,
            2 => WorkState::Active,
            3 => WorkState::Finished,
            _ => unreachable!("2-bit state section out of range"),
        }
    }
}

/// A work's packed status.
pub struct Status {
    bits: AtomicBitfield<u8, 3>,
}

// === impl Status ===

impl Status {
    #[must_use]
    pub fn new() -> Self {
        Self {
            bits: AtomicBitfield::new(&STATUS_LAYOUT),
        }
    }

    pub fn state(&self) -> WorkState {
        WorkState::from_bits(self.bits.load_ordered(STATE, Ordering::Acquire))
    }

    pub fn is_finished(&self) -> bool {
        self.state() == WorkState::Finished
    }

    pub fn is_queued(&self) -> bool {
        self.state() == WorkState::Queued
    }

    /// `available -> queued`. Idempotent: `false` when the work is already
    /// queued, active or finished.
    pub fn enqueue(&self) -> bool {
        self.bits.compare_exchange(
            STATE,
            STATE,
            WorkState::Available as u8,
            WorkState::Queued as u8,
        )
    }

    /// Marks the work as awaited; `true` only for the first marker.
    pub fn require(&self) -> bool {
        self.bits.exchange(REQUIRED, 1) == 0
    }

    pub fn required(&self) -> bool {
        self.bits.load(REQUIRED) == 1
    }

    /// Claims exclusive run ownership and advances the state to `active`.
    ///
    /// At most one caller succeeds at a time; `false` when another worker
    /// holds the work or it is already finished.
    pub fn acquire(&self) -> bool {
        loop {
            let state = self.bits.load_ordered(STATE, Ordering::Acquire);
            if state == WorkState::Finished as u8 {
                return false;
            }
            // both the observed state and the free `acquired` bit must hold
            // for the claim to count
            if self.bits.compare_exchange2(STATE, ACQUIRED, ACQUIRED, state, 0, 1) {
                self.bits.store(STATE, WorkState::Active as u8);
                return true;
            }
            if self.bits.load(ACQUIRED) == 1 {
                return false;
            }
            // the state section moved underneath us (e.g. an enqueue racing
            // with this claim); retry against the fresh value
        }
    }

    /// Releases run ownership without finishing.
    ///
    /// Returns `false` when the work is still required by a waiter, telling
    /// the caller to keep it scheduled.
    pub fn release(&self) -> bool {
        let required = self.required();
        self.bits.store(ACQUIRED, 0);
        !required
    }

    /// Releases run ownership after a stack inversion; the state stays
    /// `active` so the lifecycle never moves backwards.
    pub fn cancel(&self) {
        self.bits.store(ACQUIRED, 0);
    }

    /// Enters the terminal state.
    pub fn finish(&self) {
        self.bits.store(STATE, WorkState::Finished as u8);
    }

    pub fn acquired(&self) -> bool {
        self.bits.load(ACQUIRED) == 1
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Status")
            .field("state", &self.state())
            .field("required", &self.required())
            .field("acquired", &self.acquired())
            .finish_non_exhaustive()
    }
}

/// One function activation, scheduled independently.
pub struct Work {
    status: Status,
    /// The materialized activation: bound arguments plus scratch slots.
    /// Accessed only by the worker holding the `acquired` bit.
    inst: UnsafeCell<Box<dyn FnInst>>,
    /// The placeholders this work fulfills, one per result leaf. Weak: a
    /// result nobody holds any more does not need producing.
    targets: Vec<Weak<LazyCell>>,
    /// Waiters to count down on completion; guarded by the work's lock.
    continuations: Locked<Vec<Arc<Continuation>>>,
    bounds: SizeClass,
}

// Safety: `inst` is only touched by the worker that holds the `acquired`
// bit, which admits one owner at a time; all other fields are atomics or
// lock-guarded.
unsafe impl Send for Work {}
// Safety: see the `Send` impl above.
unsafe impl Sync for Work {}

// === impl Work ===

impl Work {
    /// Builds the work for one call of `gen` with `args` bound, along with
    /// the lazy result the caller can hold on to.
    ///
    /// The result has one fresh placeholder per leaf of the generator's
    /// declared shape, each back-referencing the new work.
    pub fn call(r#gen: &FnGen, args: &[Lazy]) -> (WorkRef, Lazy) {
        let inst = r#gen.instantiate(args.to_vec());
        let bounds = inst.bounds();

        let (result, leaves) = r#gen.ret_shape().placeholders();
        let work = Arc::new(Self {
            status: Status::new(),
            inst: UnsafeCell::new(inst),
            targets: leaves.iter().map(Arc::downgrade).collect(),
            continuations: Locked::new(Vec::new()),
            bounds,
        });
        for leaf in &leaves {
            leaf.set_source(Arc::clone(&work));
        }

        tracing::trace!(targets = leaves.len(), ?bounds, "built work");
        (work, result)
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    pub fn done(&self) -> bool {
        self.status.is_finished()
    }

    pub fn bounds(&self) -> SizeClass {
        self.bounds
    }

    /// Runs the body. The caller must hold the `acquired` bit.
    pub fn run(self: &Arc<Self>, cx: &mut Context) -> RunOutcome {
        debug_assert!(self.status.acquired(), "ran a work without acquiring it");

        let outcome = self.inst.with_mut(|inst| {
            // Safety: the `acquired` bit grants exclusive access to the
            // instance, and we hold it for the whole call.
            unsafe { (*inst).body(cx) }
        });

        match outcome {
            Ok(result) => {
                self.finish(result);
                RunOutcome::Finished
            }
            Err(Suspend) => {
                tracing::trace!("work suspended");
                self.status.cancel();
                RunOutcome::Suspended
            }
        }
    }

    /// Publishes `result` into the targets, finishes, and notifies waiters.
    fn finish(&self, result: Lazy) {
        let mut leaves = Vec::with_capacity(self.targets.len());
        result.flatten_into(&mut leaves);
        assert_eq!(
            leaves.len(),
            self.targets.len(),
            "body result shape does not match the declared return shape",
        );

        for (target, leaf) in self.targets.iter().zip(leaves) {
            if let Some(cell) = target.upgrade() {
                cell.assign(Link::Chain(leaf));
            }
        }

        self.status.finish();
        self.status.cancel();

        let waiters = std::mem::take(&mut *self.continuations.lock());
        tracing::trace!(waiters = waiters.len(), "work finished");
        for cont in waiters {
            cont.update();
        }
    }

    /// Registers a waiter; `false` when the work already finished, in which
    /// case the caller counts the continuation down itself.
    pub(crate) fn add_continuation(&self, cont: Arc<Continuation>) -> bool {
        let mut waiters = self.continuations.lock();
        if self.status.is_finished() {
            return false;
        }
        waiters.push(cont);
        true
    }
}

impl fmt::Debug for Work {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Work")
            .field("status", &self.status)
            .field("targets", &self.targets.len())
            .field("bounds", &self.bounds)
            .finish_non_exhaustive()
    }
}
