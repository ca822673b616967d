// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Lazy values: single-assignment cells, assembled structurally.
//!
//! A [`Lazy`] is either a leaf cell or a tuple of lazies — a tuple-typed
//! value is *never* one cell boxing a tuple, so consumers can demand
//! individual elements without forcing their siblings.
//!
//! A [`LazyCell`] starts in one of two lives: a *constant* is born resolved,
//! a *placeholder* is born empty with a strong reference to the
//! [`Work`][crate::work::Work] that will fulfill it. Fulfillment assigns
//! exactly once, chaining the cell to the cell produced by the work's body;
//! the chain is followed on every read. Assignment publishes with release
//! ordering and readers check with acquire, so a `done` observation
//! happens-before any `value` read.

use crate::continuation::Continuation;
use crate::loom::cell::UnsafeCell;
use crate::loom::sync::atomic::{AtomicU8, Ordering};
use crate::value::{FnId, Int, Value, VariantValue};
use crate::work::WorkRef;
use core::fmt;
use filament_sync::{Locked, SpinWait};
use smallvec::SmallVec;
use static_assertions::assert_impl_all;
use std::sync::Arc;

/// Works that must complete before some value becomes available.
pub type WorkList = SmallVec<[WorkRef; 4]>;

/// A lazy value: a leaf cell or a tuple of lazy values.
#[derive(Clone, Debug)]
pub enum Lazy {
    Cell(Arc<LazyCell>),
    Tuple(Arc<[Lazy]>),
}

assert_impl_all!(Lazy: Send, Sync);

/// Publication states of a cell's reference slot.
const EMPTY: u8 = 0;
const WRITING: u8 = 1;
const READY: u8 = 2;

/// A single-assignment cell.
pub struct LazyCell {
    state: AtomicU8,
    /// Written exactly once, during the `EMPTY -> WRITING -> READY`
    /// transition of `state`; read-only once `READY` is observed.
    slot: UnsafeCell<Option<Link>>,
    /// The work that will fulfill this cell; dropped on assignment so
    /// finished works do not outlive their consumers.
    source: Locked<Option<WorkRef>>,
}

#[derive(Clone)]
pub(crate) enum Link {
    Const(Value),
    Chain(Arc<LazyCell>),
}

// Safety: `slot` is written only by the single thread that wins the
// `EMPTY -> WRITING` transition, before the release-store of `READY`; every
// reader checks for `READY` with acquire ordering first. `source` is behind
// a lock.
unsafe impl Send for LazyCell {}
// Safety: see the `Send` impl above.
unsafe impl Sync for LazyCell {}

// === impl LazyCell ===

impl LazyCell {
    /// A cell that is born resolved.
    pub fn constant(value: Value) -> Arc<Self> {
        Arc::new(Self {
            state: AtomicU8::new(READY),
            slot: UnsafeCell::new(Some(Link::Const(value))),
            source: Locked::new(None),
        })
    }

    /// An empty cell. The fulfilling work is wired up with
    /// [`set_source`][Self::set_source] right after the work itself is
    /// allocated (the two reference each other, the work side weakly).
    pub(crate) fn placeholder() -> Arc<Self> {
        Arc::new(Self {
            state: AtomicU8::new(EMPTY),
            slot: UnsafeCell::new(None),
            source: Locked::new(None),
        })
    }

    pub(crate) fn set_source(&self, work: WorkRef) {
        *self.source.lock() = Some(work);
    }

    /// Whether a value can be read out of this cell.
    pub fn done(&self) -> bool {
        if self.state.load(Ordering::Acquire) != READY {
            return false;
        }
        match self.link() {
            Link::Const(_) => true,
            Link::Chain(next) => next.done(),
        }
    }

    /// Reads the value, following reference chains.
    ///
    /// # Panics
    ///
    /// Panics if the cell is not [`done`][Self::done]; demanding an
    /// unfulfilled value is a scheduler bug.
    #[track_caller]
    pub fn value(&self) -> Value {
        assert!(
            self.state.load(Ordering::Acquire) == READY,
            "value read from an unfulfilled cell",
        );
        match self.link() {
            Link::Const(value) => value,
            Link::Chain(next) => next.value(),
        }
    }

    /// The published link; callable only after `READY` was observed.
    fn link(&self) -> Link {
        self.slot.with(|slot| {
            // Safety: `READY` has been observed with acquire ordering, so
            // the slot is initialized and will never be written again.
            unsafe { (*slot).clone() }.expect("READY cell with an empty slot")
        })
    }

    /// The cell's one-time assignment.
    ///
    /// # Panics
    ///
    /// Panics on a second assignment; fulfilling a placeholder twice is a
    /// scheduler bug.
    pub(crate) fn assign(&self, link: Link) {
        self.state
            .compare_exchange(EMPTY, WRITING, Ordering::Acquire, Ordering::Relaxed)
            .unwrap_or_else(|_| panic!("placeholder assigned twice"));
        // Safety: winning the `EMPTY -> WRITING` transition grants exclusive
        // access to the slot.
        self.slot.with_mut(|slot| unsafe { *slot = Some(link) });
        self.state.store(READY, Ordering::Release);
        // the back-reference to the fulfilling work has done its job
        self.source.lock().take();
    }

    /// Appends every work that must complete before this cell is done.
    pub(crate) fn collect_work(&self, out: &mut WorkList) {
        if self.state.load(Ordering::Acquire) == READY {
            if let Link::Chain(next) = self.link()
                && !next.done()
            {
                next.collect_work(out);
            }
            return;
        }
        if let Some(work) = self.source.lock().clone()
            && !work.done()
        {
            out.push(work);
        }
    }

    /// Registers `cont` to be counted down once this cell's current
    /// fulfilling step completes; counts down immediately if it already has.
    pub(crate) fn add_continuation(&self, cont: &Arc<Continuation>) {
        let mut spin = SpinWait::new();
        loop {
            if self.state.load(Ordering::Acquire) == READY {
                match self.link() {
                    Link::Const(_) => cont.update(),
                    Link::Chain(next) => next.add_continuation(cont),
                }
                return;
            }
            if let Some(work) = self.source.lock().clone() {
                if !work.add_continuation(Arc::clone(cont)) {
                    // the work slipped into `finished` first
                    cont.update();
                }
                return;
            }
            // neither ready nor sourced: the cell is mid-assignment
            spin.spin();
        }
    }
}

impl fmt::Debug for LazyCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.done() {
            f.debug_struct("LazyCell")
                .field("value", &self.value())
                .finish_non_exhaustive()
        } else {
            f.debug_struct("LazyCell")
                .field("value", &"<pending>")
                .finish_non_exhaustive()
        }
    }
}

// === impl Lazy ===

impl Lazy {
    /// A non-interned constant; prefer [`crate::cache::lazy_int`] and
    /// friends for literals.
    pub fn constant(value: Value) -> Self {
        Lazy::Cell(LazyCell::constant(value))
    }

    pub fn tuple(items: Vec<Lazy>) -> Self {
        Lazy::Tuple(items.into())
    }

    pub fn done(&self) -> bool {
        match self {
            Lazy::Cell(cell) => cell.done(),
            Lazy::Tuple(items) => items.iter().all(Lazy::done),
        }
    }

    /// Reads a leaf value.
    ///
    /// # Panics
    ///
    /// Panics on a tuple (tuples have no single value) or when not done.
    #[track_caller]
    pub fn value(&self) -> Value {
        match self {
            Lazy::Cell(cell) => cell.value(),
            Lazy::Tuple(_) => panic!("value read from a tuple"),
        }
    }

    #[track_caller]
    pub fn as_int(&self) -> Int {
        self.value().as_int()
    }

    #[track_caller]
    pub fn as_bool(&self) -> bool {
        self.value().as_bool()
    }

    #[track_caller]
    pub fn as_fn(&self) -> FnId {
        self.value().as_fn()
    }

    #[track_caller]
    pub fn as_variant(&self) -> VariantValue {
        match self.value() {
            Value::Variant(v) => v,
            other => panic!("expected a variant, found {other:?}"),
        }
    }

    /// Projects a tuple element.
    ///
    /// # Panics
    ///
    /// Panics on a leaf or an out-of-range index.
    #[track_caller]
    pub fn field(&self, index: usize) -> Lazy {
        match self {
            Lazy::Tuple(items) => items[index].clone(),
            Lazy::Cell(_) => panic!("field projection on a non-tuple"),
        }
    }

    /// The number of leaf cells, which is the number of placeholders a work
    /// producing this shape fulfills.
    pub fn leaf_count(&self) -> usize {
        match self {
            Lazy::Cell(_) => 1,
            Lazy::Tuple(items) => items.iter().map(Lazy::leaf_count).sum(),
        }
    }

    pub(crate) fn flatten_into(&self, out: &mut Vec<Arc<LazyCell>>) {
        match self {
            Lazy::Cell(cell) => out.push(Arc::clone(cell)),
            Lazy::Tuple(items) => {
                for item in items.iter() {
                    item.flatten_into(out);
                }
            }
        }
    }

    /// Appends every work that must complete before this value is done.
    pub fn collect_work(&self, out: &mut WorkList) {
        match self {
            Lazy::Cell(cell) => cell.collect_work(out),
            Lazy::Tuple(items) => {
                for item in items.iter() {
                    item.collect_work(out);
                }
            }
        }
    }

    /// Installs `cont` on every leaf; `cont.remaining` must have been sized
    /// to [`leaf_count`][Self::leaf_count] installations.
    pub fn add_continuation(&self, cont: &Arc<Continuation>) {
        match self {
            Lazy::Cell(cell) => cell.add_continuation(cont),
            Lazy::Tuple(items) => {
                for item in items.iter() {
                    item.add_continuation(cont);
                }
            }
        }
    }
}

/// Renders a finished value: `5`, `true`, `()`, `(1, (2, 3))`.
///
/// # Panics
///
/// Panics when the value is not done; the driver only renders after the
/// root placeholder resolved.
impl fmt::Display for Lazy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lazy::Cell(cell) => write!(f, "{}", cell.value()),
            Lazy::Tuple(items) => {
                f.write_str("(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str(")")
            }
        }
    }
}
