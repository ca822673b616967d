// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Function values: generators, instances, and the closure table.
//!
//! A function value is two-layered. The *generator* ([`FnGen`]) is the
//! shareable part: how to materialize an activation, the captured
//! environment, and the result shape. The *instance* ([`FnInst`]) is one
//! activation's mutable state: bound arguments plus whatever scratch slots
//! the body declares, so that a body re-entered after a stack inversion
//! finds its already-spawned children instead of spawning them again.

use crate::context::Context;
use crate::lazy::{Lazy, LazyCell};
use crate::value::FnId;
use crate::work::SizeClass;
use filament_sync::Locked;
use std::sync::Arc;

/// The stack-inversion signal.
///
/// Not an error: a body returns `Err(Suspend)` (usually by `?` on
/// [`Context::wait`]) to surrender its stack until dependencies resolve.
/// Only the worker loop consumes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Suspend;

/// One materialized activation of a function body.
pub trait FnInst: Send {
    /// Executes or resumes the body.
    ///
    /// Invoked again after every stack inversion; implementations keep
    /// spawned children in scratch fields so re-entry is idempotent.
    fn body(&mut self, cx: &mut Context) -> Result<Lazy, Suspend>;

    /// The declared cost estimate of this body.
    fn bounds(&self) -> SizeClass;
}

/// The shape of a function's result: how many placeholder leaves a call
/// allocates, and how they nest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shape {
    Leaf,
    Tuple(Vec<Shape>),
}

// === impl Shape ===

impl Shape {
    pub fn pair() -> Self {
        Shape::Tuple(vec![Shape::Leaf, Shape::Leaf])
    }

    pub fn leaf_count(&self) -> usize {
        match self {
            Shape::Leaf => 1,
            Shape::Tuple(items) => items.iter().map(Shape::leaf_count).sum(),
        }
    }

    /// Allocates one placeholder per leaf; returns the structured lazy and
    /// the leaves in assignment order.
    pub(crate) fn placeholders(&self) -> (Lazy, Vec<Arc<LazyCell>>) {
        let mut leaves = Vec::with_capacity(self.leaf_count());
        let lazy = self.placeholders_into(&mut leaves);
        (lazy, leaves)
    }

    fn placeholders_into(&self, leaves: &mut Vec<Arc<LazyCell>>) -> Lazy {
        match self {
            Shape::Leaf => {
                let cell = LazyCell::placeholder();
                leaves.push(Arc::clone(&cell));
                Lazy::Cell(cell)
            }
            Shape::Tuple(items) => Lazy::Tuple(
                items
                    .iter()
                    .map(|item| item.placeholders_into(leaves))
                    .collect(),
            ),
        }
    }
}

type InitFn = dyn Fn(Vec<Lazy>, Lazy) -> Box<dyn FnInst> + Send + Sync;

/// A function value's shareable half: instantiation, captured environment,
/// result shape.
pub struct FnGen {
    init: Box<InitFn>,
    env: Lazy,
    ret: Shape,
}

// === impl FnGen ===

impl FnGen {
    pub fn new(
        ret: Shape,
        env: Lazy,
        init: impl Fn(Vec<Lazy>, Lazy) -> Box<dyn FnInst> + Send + Sync + 'static,
    ) -> Self {
        Self {
            init: Box::new(init),
            env,
            ret,
        }
    }

    pub fn ret_shape(&self) -> &Shape {
        &self.ret
    }

    /// Materializes one activation with `args` bound and the captured
    /// environment handed through.
    pub fn instantiate(&self, args: Vec<Lazy>) -> Box<dyn FnInst> {
        (self.init)(args, self.env.clone())
    }
}

impl core::fmt::Debug for FnGen {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FnGen").field("ret", &self.ret).finish_non_exhaustive()
    }
}

/// The engine-owned table of function generators.
///
/// Function *values* are [`FnId`] indices into this table, so closures that
/// capture themselves or each other hold indices rather than strong
/// references — no reference cycles. [`reserve`][Self::reserve] +
/// [`fill`][Self::fill] exist exactly for those knots.
#[derive(Clone, Default)]
pub struct ClosureTable {
    gens: Arc<Locked<Vec<Option<Arc<FnGen>>>>>,
}

// === impl ClosureTable ===

impl ClosureTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a generator, returning its function value.
    pub fn add(&self, r#gen: FnGen) -> FnId {
        let id = self.reserve();
        self.fill(id, r#gen);
        id
    }

    /// Reserves an id to be [`fill`][Self::fill]ed later; lets a closure's
    /// environment mention the closure itself.
    pub fn reserve(&self) -> FnId {
        let mut gens = self.gens.lock();
        let id = u32::try_from(gens.len()).expect("closure table overflow");
        gens.push(None);
        FnId(id)
    }

    /// # Panics
    ///
    /// Panics if `id` was already filled.
    pub fn fill(&self, id: FnId, r#gen: FnGen) {
        let mut gens = self.gens.lock();
        let slot = &mut gens[usize::try_from(id.0).expect("id fits usize")];
        assert!(slot.is_none(), "closure id filled twice");
        *slot = Some(Arc::new(r#gen));
    }

    /// # Panics
    ///
    /// Panics on an unfilled or unknown id; calling through a reserved but
    /// never-filled function value is a program-construction bug.
    pub fn resolve(&self, id: FnId) -> Arc<FnGen> {
        let gens = self.gens.lock();
        gens[usize::try_from(id.0).expect("id fits usize")]
            .clone()
            .expect("unfilled closure id")
    }

    pub fn len(&self) -> usize {
        self.gens.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl core::fmt::Debug for ClosureTable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ClosureTable")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

/// The declared type of one entry-point parameter, used to convert argv
/// strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Int,
    Bool,
}

/// A runnable program: the closure table, the entry function, and the entry
/// parameter types.
#[derive(Clone, Debug)]
pub struct Program {
    pub table: ClosureTable,
    pub entry: FnId,
    pub params: Vec<ParamKind>,
}
