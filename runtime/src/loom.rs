// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Loom shims; see `filament-sync`'s module of the same name.

use cfg_if::cfg_if;

cfg_if! {
    if #[cfg(loom)] {
        pub use loom::sync;
        pub use loom::cell;
        pub use loom::model;
        pub use loom::thread;
        pub use loom::lazy_static;
    } else {
        pub use std::thread;
        pub use lazy_static::lazy_static;

        pub mod sync {
            pub use std::sync::*;
        }

        #[cfg(test)]
        #[inline(always)]
        pub fn model<R>(f: impl FnOnce() -> R) -> R {
            f()
        }

        pub mod cell {
            /// Mirror of `loom::cell::UnsafeCell`, closure-based so the same
            /// call sites type-check under both configurations.
            #[derive(Debug)]
            pub struct UnsafeCell<T>(core::cell::UnsafeCell<T>);

            impl<T> UnsafeCell<T> {
                pub const fn new(data: T) -> UnsafeCell<T> {
                    UnsafeCell(core::cell::UnsafeCell::new(data))
                }

                #[inline(always)]
                pub fn with<R>(&self, f: impl FnOnce(*const T) -> R) -> R {
                    f(self.0.get())
                }

                #[inline(always)]
                pub fn with_mut<R>(&self, f: impl FnOnce(*mut T) -> R) -> R {
                    f(self.0.get())
                }
            }
        }
    }
}
