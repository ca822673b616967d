// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The runtime representation of program values.
//!
//! Tuples deliberately do not appear here: a tuple is structurally
//! transparent and lives in [`Lazy::Tuple`][crate::lazy::Lazy] as a tuple of
//! lazy values, never as a value boxing its elements.

use crate::lazy::Lazy;
use core::fmt;

/// The integer type of the source language.
pub type Int = i64;

/// A function value: an index into the engine's closure table.
///
/// Self- and mutually-recursive closures refer to each other through these
/// indices, so no reference-counting cycles arise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FnId(pub(crate) u32);

/// A single (non-tuple) runtime value.
#[derive(Debug, Clone)]
pub enum Value {
    /// The unit value, rendered `()`.
    Unit,
    Int(Int),
    Bool(bool),
    Fn(FnId),
    /// A tagged-union value: the tag picks the constructor, the payload is
    /// lazy like everything else.
    Variant(VariantValue),
}

#[derive(Debug, Clone)]
pub struct VariantValue {
    pub tag: u32,
    pub payload: Lazy,
}

// === impl Value ===

impl Value {
    /// # Panics
    ///
    /// Panics when the value is not an integer; the compiler front-end is
    /// responsible for never producing such a program.
    #[track_caller]
    pub fn as_int(&self) -> Int {
        match self {
            Value::Int(i) => *i,
            other => panic!("expected an Int, found {other:?}"),
        }
    }

    /// # Panics
    ///
    /// Panics when the value is not a boolean.
    #[track_caller]
    pub fn as_bool(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            other => panic!("expected a Bool, found {other:?}"),
        }
    }

    /// # Panics
    ///
    /// Panics when the value is not a function.
    #[track_caller]
    pub fn as_fn(&self) -> FnId {
        match self {
            Value::Fn(f) => *f,
            other => panic!("expected a function, found {other:?}"),
        }
    }

    /// # Panics
    ///
    /// Panics when the value is not a variant.
    #[track_caller]
    pub fn as_variant(&self) -> &VariantValue {
        match self {
            Value::Variant(v) => v,
            other => panic!("expected a variant, found {other:?}"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unit => f.write_str("()"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Fn(_) => f.write_str("<fn>"),
            Value::Variant(v) => write!(f, "#{}{}", v.tag, v.payload),
        }
    }
}
