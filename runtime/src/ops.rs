// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The built-in operators.
//!
//! Each operator is an ordinary function value in the closure table and
//! goes through the scheduler like user code: the body demands its
//! arguments, awaits them (suspending if necessary), applies the host
//! operation, and returns an interned constant. Integer arithmetic uses
//! wrapping host semantics; division and modulo by zero are the host's
//! fault and terminate the process.

use crate::cache;
use crate::context::Context;
use crate::func::{ClosureTable, FnGen, FnInst, Shape, Suspend};
use crate::lazy::Lazy;
use crate::value::{FnId, Int};
use crate::work::SizeClass;

/// The function values of every built-in operator.
#[derive(Debug, Clone, Copy)]
pub struct Builtins {
    pub plus: FnId,
    pub minus: FnId,
    pub multiply: FnId,
    pub divide: FnId,
    pub exponentiate: FnId,
    pub modulo: FnId,
    pub left_shift: FnId,
    pub right_shift: FnId,
    pub spaceship: FnId,
    pub bit_and: FnId,
    pub bit_or: FnId,
    pub bit_xor: FnId,
    pub increment: FnId,
    pub decrement: FnId,
    pub negation: FnId,
    pub lt: FnId,
    pub le: FnId,
    pub eq: FnId,
    pub ne: FnId,
    pub gt: FnId,
    pub ge: FnId,
}

struct BinaryIntInst {
    x: Lazy,
    y: Lazy,
    op: fn(Int, Int) -> Int,
    bounds: SizeClass,
}

impl FnInst for BinaryIntInst {
    fn body(&mut self, cx: &mut Context) -> Result<Lazy, Suspend> {
        cx.demand(&self.x);
        cx.demand(&self.y);
        cx.wait(&[&self.x, &self.y])?;
        Ok(cache::lazy_int((self.op)(self.x.as_int(), self.y.as_int())))
    }

    fn bounds(&self) -> SizeClass {
        self.bounds
    }
}

struct ComparisonInst {
    x: Lazy,
    y: Lazy,
    op: fn(Int, Int) -> bool,
}

impl FnInst for ComparisonInst {
    fn body(&mut self, cx: &mut Context) -> Result<Lazy, Suspend> {
        cx.demand(&self.x);
        cx.demand(&self.y);
        cx.wait(&[&self.x, &self.y])?;
        Ok(cache::lazy_bool((self.op)(self.x.as_int(), self.y.as_int())))
    }

    fn bounds(&self) -> SizeClass {
        SizeClass::exact(9)
    }
}

struct UnaryIntInst {
    x: Lazy,
    op: fn(Int) -> Int,
}

impl FnInst for UnaryIntInst {
    fn body(&mut self, cx: &mut Context) -> Result<Lazy, Suspend> {
        cx.demand(&self.x);
        cx.wait(&[&self.x])?;
        Ok(cache::lazy_int((self.op)(self.x.as_int())))
    }

    fn bounds(&self) -> SizeClass {
        SizeClass::exact(8)
    }
}

struct NegationInst {
    x: Lazy,
}

impl FnInst for NegationInst {
    fn body(&mut self, cx: &mut Context) -> Result<Lazy, Suspend> {
        cx.demand(&self.x);
        cx.wait(&[&self.x])?;
        Ok(cache::lazy_bool(!self.x.as_bool()))
    }

    fn bounds(&self) -> SizeClass {
        SizeClass::exact(8)
    }
}

fn binary_int(table: &ClosureTable, size: usize, op: fn(Int, Int) -> Int) -> FnId {
    table.add(FnGen::new(
        Shape::Leaf,
        cache::lazy_unit(),
        move |mut args, _env| {
            let y = args.pop().expect("binary operator arity");
            let x = args.pop().expect("binary operator arity");
            Box::new(BinaryIntInst {
                x,
                y,
                op,
                bounds: SizeClass::exact(size),
            })
        },
    ))
}

fn comparison(table: &ClosureTable, op: fn(Int, Int) -> bool) -> FnId {
    table.add(FnGen::new(
        Shape::Leaf,
        cache::lazy_unit(),
        move |mut args, _env| {
            let y = args.pop().expect("comparison arity");
            let x = args.pop().expect("comparison arity");
            Box::new(ComparisonInst { x, y, op })
        },
    ))
}

fn unary_int(table: &ClosureTable, op: fn(Int) -> Int) -> FnId {
    table.add(FnGen::new(
        Shape::Leaf,
        cache::lazy_unit(),
        move |mut args, _env| {
            let x = args.pop().expect("unary operator arity");
            Box::new(UnaryIntInst { x, op })
        },
    ))
}

/// `x ^ y` with the source language's semantics: negative exponents give 0,
/// everything wraps.
fn exponentiate(x: Int, y: Int) -> Int {
    if y < 0 {
        return 0;
    }
    let mut result: Int = 1;
    let mut base = x;
    let mut exp = y;
    while exp != 0 {
        if exp & 1 == 1 {
            result = result.wrapping_mul(base);
        }
        exp >>= 1;
        base = base.wrapping_mul(base);
    }
    result
}

/// Three-way comparison, -1 / 0 / 1.
fn spaceship(x: Int, y: Int) -> Int {
    match x.cmp(&y) {
        core::cmp::Ordering::Less => -1,
        core::cmp::Ordering::Equal => 0,
        core::cmp::Ordering::Greater => 1,
    }
}

fn shift_amount(y: Int) -> u32 {
    // the host shifts modulo the word width
    u32::try_from(y & 63).expect("masked shift amount fits u32")
}

/// Registers all built-in operators in `table`.
pub fn install(table: &ClosureTable) -> Builtins {
    Builtins {
        plus: binary_int(table, 9, |x, y| x.wrapping_add(y)),
        minus: binary_int(table, 9, |x, y| x.wrapping_sub(y)),
        multiply: binary_int(table, 9, |x, y| x.wrapping_mul(y)),
        divide: binary_int(table, 10, |x, y| x.wrapping_div(y)),
        exponentiate: binary_int(table, 12, exponentiate),
        modulo: binary_int(table, 10, |x, y| x.wrapping_rem(y)),
        left_shift: binary_int(table, 9, |x, y| x.wrapping_shl(shift_amount(y))),
        right_shift: binary_int(table, 9, |x, y| x.wrapping_shr(shift_amount(y))),
        spaceship: binary_int(table, 9, spaceship),
        bit_and: binary_int(table, 9, |x, y| x & y),
        bit_or: binary_int(table, 9, |x, y| x | y),
        bit_xor: binary_int(table, 9, |x, y| x ^ y),
        increment: unary_int(table, |x| x.wrapping_add(1)),
        decrement: unary_int(table, |x| x.wrapping_sub(1)),
        negation: table.add(FnGen::new(
            Shape::Leaf,
            cache::lazy_unit(),
            |mut args, _env| {
                let x = args.pop().expect("negation arity");
                Box::new(NegationInst { x })
            },
        )),
        lt: comparison(table, |x, y| x < y),
        le: comparison(table, |x, y| x <= y),
        eq: comparison(table, |x, y| x == y),
        ne: comparison(table, |x, y| x != y),
        gt: comparison(table, |x, y| x > y),
        ge: comparison(table, |x, y| x >= y),
    }
}
