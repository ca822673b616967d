// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The filament evaluation runtime.
//!
//! A compiled program is a table of function generators plus an entry point.
//! The engine wraps the entry activation into a root [`work::Work`], hands
//! it to a pool of workers pinned to CPU cores, and lets demand drive the
//! rest: bodies spawn child works for subexpressions, suspend (surrendering
//! their stack) on values that are not ready, and are rescheduled by
//! countdown [`continuation::Continuation`]s once their dependencies land
//! in the single-assignment [`lazy::Lazy`] cells.

pub mod cache;
pub mod context;
pub mod continuation;
pub mod engine;
pub mod func;
pub mod lazy;
pub mod loom;
pub mod ops;
pub mod park;
pub mod runner;
pub mod sys;
pub mod value;
pub mod work;

pub use context::Context;
pub use engine::{Config, Engine};
pub use func::{ClosureTable, FnGen, FnInst, ParamKind, Program, Shape, Suspend};
pub use lazy::Lazy;
pub use value::{FnId, Int, Value, VariantValue};
pub use work::{RunOutcome, SizeClass, Work, WorkRef};
