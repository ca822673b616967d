// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Interned constants.
//!
//! Programs churn through the same handful of literals — loop counters,
//! branch booleans, unit — so the cells for every integer in
//! `[-128, 128)`, both booleans and unit are process-wide singletons,
//! immutable after first use.

use crate::lazy::{Lazy, LazyCell};
use crate::loom::lazy_static;
use crate::value::{Int, Value};
use std::sync::Arc;

/// Half-width of the interned integer range.
const RANGE: Int = 128;

lazy_static! {
    static ref INTS: Vec<Arc<LazyCell>> = (-RANGE..RANGE)
        .map(|i| LazyCell::constant(Value::Int(i)))
        .collect();
    static ref TRUE: Arc<LazyCell> = LazyCell::constant(Value::Bool(true));
    static ref FALSE: Arc<LazyCell> = LazyCell::constant(Value::Bool(false));
    static ref UNIT: Arc<LazyCell> = LazyCell::constant(Value::Unit);
}

/// The lazy integer `i`: the shared cell for small values, a fresh constant
/// otherwise.
#[must_use]
pub fn lazy_int(i: Int) -> Lazy {
    if (-RANGE..RANGE).contains(&i) {
        let index = usize::try_from(i + RANGE).expect("index in range");
        Lazy::Cell(Arc::clone(&INTS[index]))
    } else {
        Lazy::constant(Value::Int(i))
    }
}

/// The lazy boolean `b`; always one of the two shared cells.
#[must_use]
pub fn lazy_bool(b: bool) -> Lazy {
    if b {
        Lazy::Cell(Arc::clone(&TRUE))
    } else {
        Lazy::Cell(Arc::clone(&FALSE))
    }
}

/// The shared unit value.
#[must_use]
pub fn lazy_unit() -> Lazy {
    Lazy::Cell(Arc::clone(&UNIT))
}
